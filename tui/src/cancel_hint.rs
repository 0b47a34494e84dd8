use std::time::Duration;
use std::time::Instant;

use crate::app_event::AppCommand;
use crate::app_event::AppEvent;
use crate::task_poll::RunSet;

/// The "press Ctrl+X to cancel" affordance for the most recently triggered run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CancelHint {
    pub run_id: String,
    pub workflow_name: String,
    pub expires_at: Instant,
    /// A cancel request for this run is in flight.
    pub cancel_requested: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CancelAttempt {
    Issued(AppCommand),
    AlreadyRequested,
    NoHint,
}

/// Single slot, last write wins.
#[derive(Debug)]
pub(crate) struct CancelHintTracker {
    window: Duration,
    hint: Option<CancelHint>,
}

impl CancelHintTracker {
    pub(crate) fn new(window: Duration) -> Self {
        Self { window, hint: None }
    }

    pub(crate) fn hint(&self) -> Option<&CancelHint> {
        self.hint.as_ref()
    }

    /// Replace any existing hint and return the expiry check to schedule.
    pub(crate) fn arm(&mut self, run_id: &str, workflow_name: &str, now: Instant) -> AppCommand {
        let expires_at = now + self.window;
        self.hint = Some(CancelHint {
            run_id: run_id.to_string(),
            workflow_name: workflow_name.to_string(),
            expires_at,
            cancel_requested: false,
        });
        AppCommand::schedule(expires_at, AppEvent::CancelHintExpired)
    }

    pub(crate) fn cancel_most_recent(&mut self) -> CancelAttempt {
        match self.hint.as_mut() {
            None => CancelAttempt::NoHint,
            Some(hint) if hint.cancel_requested => CancelAttempt::AlreadyRequested,
            Some(hint) => {
                hint.cancel_requested = true;
                CancelAttempt::Issued(AppCommand::CancelRun {
                    run_id: hint.run_id.clone(),
                })
            }
        }
    }

    /// A cancel request finished, successfully or not. Only clears the slot
    /// when it still refers to `run_id`.
    pub(crate) fn on_cancel_finished(&mut self, run_id: &str) -> Option<CancelHint> {
        if self.hint.as_ref().is_some_and(|h| h.run_id == run_id) {
            self.hint.take()
        } else {
            None
        }
    }

    pub(crate) fn expire(&mut self, now: Instant) -> bool {
        match &self.hint {
            Some(hint) if now >= hint.expires_at => {
                self.hint = None;
                true
            }
            _ => false,
        }
    }

    /// Drop the hint once a refresh lists its run as no longer Running.
    pub(crate) fn clear_if_resolved(&mut self, runs: &RunSet) -> bool {
        let resolved = self
            .hint
            .as_ref()
            .and_then(|hint| runs.get(&hint.run_id))
            .is_some_and(|run| !run.is_running());
        if resolved {
            self.hint = None;
        }
        resolved
    }

    pub(crate) fn remaining(&self, now: Instant) -> Option<Duration> {
        self.hint
            .as_ref()
            .map(|hint| hint.expires_at.saturating_duration_since(now))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]
    use super::*;
    use conductor_backend_client::RunStatus;
    use conductor_backend_client::TaskRun;
    use pretty_assertions::assert_eq;

    const WINDOW: Duration = Duration::from_secs(30);

    #[test]
    fn arm_schedules_expiry_check() {
        let mut t = CancelHintTracker::new(WINDOW);
        let t0 = Instant::now();
        assert_eq!(
            t.arm("run-42", "daily_report", t0),
            AppCommand::schedule(t0 + WINDOW, AppEvent::CancelHintExpired)
        );
        assert_eq!(t.remaining(t0 + Duration::from_secs(10)), Some(Duration::from_secs(20)));
    }

    #[test]
    fn double_arm_keeps_only_second_hint() {
        let mut t = CancelHintTracker::new(WINDOW);
        let t0 = Instant::now();
        t.arm("run-1", "a", t0);
        let t1 = t0 + Duration::from_secs(5);
        t.arm("run-2", "b", t1);

        let hint = t.hint().cloned().expect("hint");
        assert_eq!(hint.run_id, "run-2");
        assert_eq!(hint.expires_at, t1 + WINDOW);

        // The first arm's expiry check fires and must not clear the second.
        assert!(!t.expire(t0 + WINDOW));
        assert!(t.hint().is_some());
        assert!(t.expire(t1 + WINDOW));
        assert!(t.hint().is_none());
    }

    #[test]
    fn cancel_issues_once_then_clears() {
        let mut t = CancelHintTracker::new(WINDOW);
        let t0 = Instant::now();
        t.arm("run-42", "daily_report", t0);

        assert_eq!(
            t.cancel_most_recent(),
            CancelAttempt::Issued(AppCommand::CancelRun {
                run_id: "run-42".to_string()
            })
        );
        assert_eq!(t.cancel_most_recent(), CancelAttempt::AlreadyRequested);

        let cleared = t.on_cancel_finished("run-42").expect("cleared");
        assert_eq!(cleared.workflow_name, "daily_report");
        assert_eq!(t.cancel_most_recent(), CancelAttempt::NoHint);
    }

    #[test]
    fn completion_for_superseded_run_keeps_newer_hint() {
        let mut t = CancelHintTracker::new(WINDOW);
        let t0 = Instant::now();
        t.arm("run-1", "a", t0);
        t.cancel_most_recent();
        t.arm("run-2", "b", t0);

        assert_eq!(t.on_cancel_finished("run-1"), None);
        assert_eq!(t.hint().map(|h| h.run_id.as_str()), Some("run-2"));
        assert!(!t.hint().is_some_and(|h| h.cancel_requested));
    }

    #[test]
    fn refresh_clears_finished_run() {
        let mut t = CancelHintTracker::new(WINDOW);
        t.arm("run-42", "daily_report", Instant::now());

        let mut runs = RunSet::new();
        assert!(!t.clear_if_resolved(&runs));

        runs.replace(
            vec![TaskRun {
                id: "run-42".to_string(),
                workflow_name: "daily_report".to_string(),
                status: RunStatus::Completed,
                success: true,
                started_at: chrono::Utc::now(),
                output: None,
            }],
            1,
        );
        assert!(t.clear_if_resolved(&runs));
        assert!(t.hint().is_none());
    }
}
