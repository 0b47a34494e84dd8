use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConfirmOutcome {
    /// First press: the caller should prompt and schedule an expiry check at
    /// `deadline`.
    NeedsArm { deadline: Instant },
    Confirmed,
}

/// Tracks "press again to confirm" windows, one per action key.
#[derive(Debug)]
pub(crate) struct ConfirmationGate<K> {
    timeout: Duration,
    deadlines: HashMap<K, Instant>,
}

impl<K: Copy + Eq + Hash> ConfirmationGate<K> {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadlines: HashMap::new(),
        }
    }

    /// Handle a press of `key` at `now`.
    pub(crate) fn check(&mut self, key: K, now: Instant) -> ConfirmOutcome {
        if let Some(deadline) = self.deadlines.remove(&key) {
            if now < deadline {
                return ConfirmOutcome::Confirmed;
            }
        }
        // Start or restart the window.
        let deadline = now + self.timeout;
        self.deadlines.insert(key, deadline);
        ConfirmOutcome::NeedsArm { deadline }
    }

    /// Clear `key` if its current deadline has passed. Returns true when a
    /// pending confirmation was dropped.
    pub(crate) fn handle_expired(&mut self, key: K, now: Instant) -> bool {
        match self.deadlines.get(&key) {
            Some(deadline) if now >= *deadline => {
                self.deadlines.remove(&key);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn pending(&self) -> Vec<K> {
        self.deadlines.keys().copied().collect()
    }
}
