//! Run set bookkeeping and the background poll chain.

use std::collections::HashSet;
use std::time::Duration;
use std::time::Instant;

use chrono::DateTime;
use chrono::Utc;
use conductor_backend_client::RunStatus;
use conductor_backend_client::TaskRun;

use crate::app_event::AppCommand;
use crate::app_event::AppEvent;
use crate::app_event::RefreshOrigin;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Bucket {
    Running,
    NeedsAttention,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RunCounts {
    pub running: usize,
    pub attention: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RunBuckets {
    pub running: Vec<TaskRun>,
    pub attention: Vec<TaskRun>,
    pub completed: Vec<TaskRun>,
    pub failed: Vec<TaskRun>,
}

/// A triggered run the server has not listed yet.
#[derive(Debug, Clone)]
struct PendingRun {
    run: TaskRun,
    /// Last fetch sequence issued before the run was inserted. Results from
    /// these fetches may predate the run.
    issued_before: u64,
}

/// Latest run list from the server plus the locally acknowledged ids.
///
/// Classification is derived on read; nothing about a bucket is stored.
#[derive(Debug, Default)]
pub(crate) struct RunSet {
    runs: Vec<TaskRun>,
    acknowledged: HashSet<String>,
    pending: Vec<PendingRun>,
}

impl RunSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Replace the whole set with the result of fetch `fetch_seq`.
    ///
    /// Locally inserted runs survive a result from a fetch issued before
    /// the insert. The first later result is authoritative for them.
    /// Acknowledgements for runs no longer reported are forgotten.
    pub(crate) fn replace(&mut self, mut runs: Vec<TaskRun>, fetch_seq: u64) {
        self.pending.retain(|pending| {
            fetch_seq <= pending.issued_before
                && !runs.iter().any(|run| run.id == pending.run.id)
        });
        for pending in &self.pending {
            runs.insert(0, pending.run.clone());
        }
        self.acknowledged
            .retain(|id| runs.iter().any(|run| &run.id == id));
        self.runs = runs;
    }

    /// Show a freshly triggered run before the server lists it.
    /// `issued_before` is the last fetch sequence handed out so far.
    pub(crate) fn insert_running(
        &mut self,
        id: &str,
        workflow_name: &str,
        now: DateTime<Utc>,
        issued_before: u64,
    ) {
        let run = TaskRun {
            id: id.to_string(),
            workflow_name: workflow_name.to_string(),
            status: RunStatus::Running,
            success: false,
            started_at: now,
            output: None,
        };
        self.runs.retain(|existing| existing.id != id);
        self.runs.insert(0, run.clone());
        self.pending.retain(|pending| pending.run.id != id);
        self.pending.push(PendingRun { run, issued_before });
    }

    pub(crate) fn get(&self, id: &str) -> Option<&TaskRun> {
        self.runs.iter().find(|run| run.id == id)
    }

    pub(crate) fn classify(&self, run: &TaskRun) -> Bucket {
        match run.status {
            RunStatus::Running => Bucket::Running,
            _ if !self.acknowledged.contains(&run.id) => Bucket::NeedsAttention,
            RunStatus::Completed => Bucket::Completed,
            RunStatus::Failed => Bucket::Failed,
        }
    }

    pub(crate) fn buckets(&self) -> RunBuckets {
        let mut buckets = RunBuckets::default();
        for run in &self.runs {
            let slot = match self.classify(run) {
                Bucket::Running => &mut buckets.running,
                Bucket::NeedsAttention => &mut buckets.attention,
                Bucket::Completed => &mut buckets.completed,
                Bucket::Failed => &mut buckets.failed,
            };
            slot.push(run.clone());
        }
        buckets
    }

    pub(crate) fn counts(&self) -> RunCounts {
        let mut counts = RunCounts::default();
        for run in &self.runs {
            match self.classify(run) {
                Bucket::Running => counts.running += 1,
                Bucket::NeedsAttention => counts.attention += 1,
                Bucket::Completed => counts.completed += 1,
                Bucket::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub(crate) fn running_count(&self) -> usize {
        self.runs.iter().filter(|run| run.is_running()).count()
    }

    /// Move every run that needs attention into its settled bucket. Returns
    /// how many were acknowledged.
    pub(crate) fn acknowledge_attention(&mut self) -> usize {
        let mut newly = 0;
        for run in &self.runs {
            if run.status != RunStatus::Running && self.acknowledged.insert(run.id.clone()) {
                newly += 1;
            }
        }
        newly
    }
}

/// Drives the fixed-interval refresh chain while anything is Running.
///
/// Every chain gets a fresh id. Ticks and poll results carry the id of the
/// chain that produced them, so once a chain stops nothing from it can
/// schedule further work.
#[derive(Debug)]
pub(crate) struct TaskPollScheduler {
    interval: Duration,
    next_chain: u64,
    active: Option<u64>,
}

impl TaskPollScheduler {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_chain: 0,
            active: None,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Start a chain unless one is already running.
    pub(crate) fn activate(&mut self, now: Instant) -> Option<AppCommand> {
        if self.active.is_some() {
            return None;
        }
        self.next_chain += 1;
        let chain = self.next_chain;
        self.active = Some(chain);
        tracing::debug!(chain, "poll chain started");
        Some(self.tick_at(chain, now))
    }

    /// A tick fired. Returns the origin to fetch with, or `None` when the
    /// tick belongs to a chain that has stopped.
    pub(crate) fn on_tick(&mut self, chain: u64) -> Option<RefreshOrigin> {
        if self.active != Some(chain) {
            tracing::debug!(chain, "dropping stale poll tick");
            return None;
        }
        Some(RefreshOrigin::Poll { chain })
    }

    /// A refresh was applied and left `running` runs in the Running state.
    pub(crate) fn on_refreshed(
        &mut self,
        origin: RefreshOrigin,
        running: usize,
        now: Instant,
    ) -> Option<AppCommand> {
        if running == 0 {
            if let Some(chain) = self.active.take() {
                tracing::debug!(chain, "poll chain stopped: nothing running");
            }
            return None;
        }
        match (origin, self.active) {
            (RefreshOrigin::Poll { chain }, Some(active)) if chain == active => {
                Some(self.tick_at(chain, now))
            }
            _ => self.activate(now),
        }
    }

    /// A fetch failed for a reason other than expired credentials.
    pub(crate) fn on_failed(&mut self, origin: RefreshOrigin, now: Instant) -> Option<AppCommand> {
        match origin {
            RefreshOrigin::Poll { chain } if self.active == Some(chain) => {
                Some(self.tick_at(chain, now))
            }
            _ => None,
        }
    }

    pub(crate) fn abandon(&mut self) {
        if let Some(chain) = self.active.take() {
            tracing::debug!(chain, "poll chain abandoned");
        }
    }

    fn tick_at(&self, chain: u64, now: Instant) -> AppCommand {
        AppCommand::schedule(now + self.interval, AppEvent::PollTick { chain })
    }
}
