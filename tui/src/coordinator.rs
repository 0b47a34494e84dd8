//! The single-writer state machine behind the terminal client.
//!
//! `Coordinator::handle` receives every asynchronous result, timer firing and
//! user intent in arrival order, routes it to the component that owns the
//! affected state and returns the follow-up work as [`AppCommand`]s. It never
//! performs I/O and takes the current time as an argument, so every scenario
//! can be driven deterministically from tests.

use std::time::Duration;
use std::time::Instant;

use chrono::Utc;
use conductor_backend_client::ApiError;
use conductor_backend_client::ChatTarget;
use conductor_backend_client::StreamEvent;
use conductor_backend_client::TaskRun;
use conductor_backend_client::TriggeredRun;

use crate::app_event::AppCommand;
use crate::app_event::AppEvent;
use crate::app_event::ConfirmAction;
use crate::app_event::RefreshOrigin;
use crate::app_event::UserAction;
use crate::cancel_hint::CancelAttempt;
use crate::cancel_hint::CancelHintTracker;
use crate::config::Config;
use crate::confirm_gate::ConfirmOutcome;
use crate::confirm_gate::ConfirmationGate;
use crate::streaming::StreamAssembler;
use crate::streaming::StreamOutcome;
use crate::streaming::StreamingMessage;
use crate::task_poll::RunBuckets;
use crate::task_poll::RunCounts;
use crate::task_poll::RunSet;
use crate::task_poll::TaskPollScheduler;

const NOTICE_TTL: Duration = Duration::from_secs(5);

/// Timing knobs for the core components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CoreSettings {
    pub poll_interval: Duration,
    pub cancel_hint_window: Duration,
    pub confirm_timeout: Duration,
    pub notice_ttl: Duration,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            cancel_hint_window: Duration::from_secs(30),
            confirm_timeout: Duration::from_secs(2),
            notice_ttl: NOTICE_TTL,
        }
    }
}

impl From<&Config> for CoreSettings {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            cancel_hint_window: Duration::from_millis(config.cancel_hint_ms),
            confirm_timeout: Duration::from_millis(config.confirm_timeout_ms),
            notice_ttl: NOTICE_TTL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NoticeKind {
    Info,
    Error,
    Auth,
}

/// Transient one-line message shown in the status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Notice {
    pub id: u64,
    pub kind: NoticeKind,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HintView {
    pub run_id: String,
    pub workflow_name: String,
    pub remaining: Duration,
    pub cancel_requested: bool,
}

/// Read-only view handed to the renderer after each processed event.
#[derive(Debug)]
pub(crate) struct CoreSnapshot<'a> {
    pub target: &'a ChatTarget,
    pub messages: &'a [StreamingMessage],
    pub is_streaming: bool,
    /// Other contexts still receiving a response.
    pub streaming_elsewhere: Vec<ChatTarget>,
    pub counts: RunCounts,
    pub buckets: RunBuckets,
    pub hint: Option<HintView>,
    pub confirmations: Vec<ConfirmAction>,
    pub notice: Option<&'a Notice>,
    pub reauth_required: bool,
    pub polling: bool,
}

pub(crate) struct Coordinator {
    settings: CoreSettings,
    target: ChatTarget,
    assembler: StreamAssembler,
    runs: RunSet,
    poll: TaskPollScheduler,
    hint: CancelHintTracker,
    gate: ConfirmationGate<ConfirmAction>,
    notice: Option<Notice>,
    next_notice_id: u64,
    /// Sequence of the most recently issued run list fetch.
    last_fetch_seq: u64,
    reauth_required: bool,
    reauth_in_flight: bool,
}

impl Coordinator {
    pub(crate) fn new(settings: CoreSettings, target: ChatTarget) -> Self {
        Self {
            settings,
            target,
            assembler: StreamAssembler::new(),
            runs: RunSet::new(),
            poll: TaskPollScheduler::new(settings.poll_interval),
            hint: CancelHintTracker::new(settings.cancel_hint_window),
            gate: ConfirmationGate::new(settings.confirm_timeout),
            notice: None,
            next_notice_id: 0,
            last_fetch_seq: 0,
            reauth_required: false,
            reauth_in_flight: false,
        }
    }

    /// Work to issue once the loop is running: the first run list fetch and,
    /// if given on the command line, the initial prompt.
    pub(crate) fn startup(&mut self, initial_prompt: Option<String>, now: Instant) -> Vec<AppCommand> {
        let mut commands = vec![self.fetch_runs(RefreshOrigin::Manual)];
        if let Some(prompt) = initial_prompt {
            commands.extend(self.on_action(UserAction::SubmitPrompt(prompt), now));
        }
        commands
    }

    pub(crate) fn handle(&mut self, event: AppEvent, now: Instant) -> Vec<AppCommand> {
        match event {
            // Terminal plumbing belongs to `App`.
            AppEvent::KeyEvent(_)
            | AppEvent::Paste(_)
            | AppEvent::RequestRedraw
            | AppEvent::Redraw
            | AppEvent::ExitRequest => Vec::new(),
            AppEvent::Action(action) => self.on_action(action, now),
            AppEvent::Chat {
                target,
                generation,
                item,
            } => self.on_chat(target, generation, item, now),
            AppEvent::RunsRefreshed {
                origin,
                seq,
                result,
            } => self.on_runs_refreshed(origin, seq, result, now),
            AppEvent::RunTriggered { workflow, result } => self.on_run_triggered(workflow, result, now),
            AppEvent::RunCancelFinished { run_id, result } => {
                self.on_cancel_finished(run_id, result, now)
            }
            AppEvent::AuthRestored => {
                self.reauth_required = false;
                self.reauth_in_flight = false;
                let mut commands = vec![self.fetch_runs(RefreshOrigin::Manual)];
                commands.push(self.set_notice(NoticeKind::Info, "Re-authenticated", now));
                commands
            }
            AppEvent::AuthRestoreFailed(message) => {
                self.reauth_in_flight = false;
                vec![self.set_notice(
                    NoticeKind::Auth,
                    format!("Re-authentication failed: {message}"),
                    now,
                )]
            }
            AppEvent::PollTick { chain } => match self.poll.on_tick(chain) {
                Some(origin) => vec![self.fetch_runs(origin)],
                None => Vec::new(),
            },
            AppEvent::CancelHintExpired => {
                if self.hint.expire(now) {
                    tracing::debug!("cancel hint expired");
                }
                Vec::new()
            }
            AppEvent::ConfirmExpired(action) => {
                self.gate.handle_expired(action, now);
                Vec::new()
            }
            AppEvent::NoticeExpired { id } => {
                if self.notice.as_ref().is_some_and(|n| n.id == id) {
                    self.notice = None;
                }
                Vec::new()
            }
        }
    }

    fn on_action(&mut self, action: UserAction, now: Instant) -> Vec<AppCommand> {
        match action {
            UserAction::SubmitPrompt(prompt) => {
                let prompt = prompt.trim().to_string();
                if prompt.is_empty() {
                    return Vec::new();
                }
                if let Some(blocked) = self.blocked_by_auth(now) {
                    return blocked;
                }
                match self.assembler.start(&self.target, &prompt) {
                    Ok(generation) => vec![AppCommand::SendChat {
                        target: self.target.clone(),
                        generation,
                        prompt,
                    }],
                    Err(_) => vec![self.set_notice(
                        NoticeKind::Info,
                        "Response still streaming. Wait for it or press Ctrl+C",
                        now,
                    )],
                }
            }
            UserAction::SelectTarget(target) => {
                let text = format!("Chatting with {target}");
                self.target = target;
                vec![self.set_notice(NoticeKind::Info, text, now)]
            }
            UserAction::TriggerWorkflow(workflow) => {
                let workflow = workflow.trim().to_string();
                if workflow.is_empty() {
                    return vec![self.set_notice(NoticeKind::Info, "Usage: /run <workflow>", now)];
                }
                if let Some(blocked) = self.blocked_by_auth(now) {
                    return blocked;
                }
                vec![AppCommand::TriggerRun { workflow }]
            }
            UserAction::CancelMostRecentRun => {
                if let Some(blocked) = self.blocked_by_auth(now) {
                    return blocked;
                }
                match self.hint.cancel_most_recent() {
                    CancelAttempt::Issued(command) => {
                        let text = match self.hint.hint() {
                            Some(hint) => format!("Cancelling {} ({})", hint.workflow_name, hint.run_id),
                            None => "Cancelling run".to_string(),
                        };
                        vec![command, self.set_notice(NoticeKind::Info, text, now)]
                    }
                    CancelAttempt::AlreadyRequested => {
                        vec![self.set_notice(NoticeKind::Info, "Cancellation already requested", now)]
                    }
                    CancelAttempt::NoHint => {
                        vec![self.set_notice(NoticeKind::Info, "No recent run to cancel", now)]
                    }
                }
            }
            UserAction::RefreshRuns => {
                if let Some(blocked) = self.blocked_by_auth(now) {
                    return blocked;
                }
                vec![self.fetch_runs(RefreshOrigin::Manual)]
            }
            UserAction::AcknowledgeRuns => {
                let acknowledged = self.runs.acknowledge_attention();
                let text = match acknowledged {
                    0 => "Nothing needs attention".to_string(),
                    1 => "Acknowledged 1 run".to_string(),
                    n => format!("Acknowledged {n} runs"),
                };
                vec![self.set_notice(NoticeKind::Info, text, now)]
            }
            UserAction::ClearConversation => {
                match self.gate.check(ConfirmAction::ClearConversation, now) {
                    ConfirmOutcome::NeedsArm { deadline } => vec![AppCommand::schedule(
                        deadline,
                        AppEvent::ConfirmExpired(ConfirmAction::ClearConversation),
                    )],
                    ConfirmOutcome::Confirmed => {
                        let mut commands = Vec::new();
                        if let Some(generation) = self.assembler.clear(&self.target) {
                            commands.push(AppCommand::AbortStream {
                                target: self.target.clone(),
                                generation,
                            });
                        }
                        commands.push(self.set_notice(NoticeKind::Info, "Conversation cleared", now));
                        commands
                    }
                }
            }
            UserAction::AbortStream => match self.assembler.interrupt(&self.target) {
                Some(generation) => vec![AppCommand::AbortStream {
                    target: self.target.clone(),
                    generation,
                }],
                None => Vec::new(),
            },
            UserAction::Reauthenticate => {
                if self.reauth_in_flight {
                    return Vec::new();
                }
                self.reauth_in_flight = true;
                vec![AppCommand::Reauthenticate]
            }
            UserAction::Quit => match self.gate.check(ConfirmAction::Quit, now) {
                ConfirmOutcome::NeedsArm { deadline } => vec![AppCommand::schedule(
                    deadline,
                    AppEvent::ConfirmExpired(ConfirmAction::Quit),
                )],
                ConfirmOutcome::Confirmed => {
                    let mut commands = self.teardown_streams();
                    commands.push(AppCommand::Exit);
                    commands
                }
            },
            UserAction::Unrecognized(input) => vec![self.set_notice(
                NoticeKind::Error,
                format!("Unrecognized command: {input}"),
                now,
            )],
        }
    }

    fn on_chat(
        &mut self,
        target: ChatTarget,
        generation: u64,
        item: Result<StreamEvent, ApiError>,
        now: Instant,
    ) -> Vec<AppCommand> {
        let auth_expired = matches!(&item, Err(err) if err.is_auth_expired());
        match self.assembler.apply(&target, generation, item) {
            StreamOutcome::Stale => {
                tracing::trace!(%target, generation, "dropping stale stream event");
                Vec::new()
            }
            StreamOutcome::Updated | StreamOutcome::Finished => Vec::new(),
            StreamOutcome::Failed(_) if auth_expired => self.on_auth_expired(now),
            StreamOutcome::Failed(message) => {
                tracing::warn!(%target, generation, "chat stream failed: {message}");
                vec![self.set_notice(NoticeKind::Error, format!("Response failed: {message}"), now)]
            }
        }
    }

    fn on_runs_refreshed(
        &mut self,
        origin: RefreshOrigin,
        seq: u64,
        result: Result<Vec<TaskRun>, ApiError>,
        now: Instant,
    ) -> Vec<AppCommand> {
        match result {
            Ok(runs) => {
                self.runs.replace(runs, seq);
                self.hint.clear_if_resolved(&self.runs);
                let running = self.runs.running_count();
                if self.reauth_required {
                    // A fetch issued before credentials expired; show its
                    // data but do not restart polling.
                    return Vec::new();
                }
                self.poll.on_refreshed(origin, running, now).into_iter().collect()
            }
            Err(err) if err.is_auth_expired() => self.on_auth_expired(now),
            Err(err) => {
                tracing::warn!(?origin, "run refresh failed: {err}");
                let mut commands: Vec<AppCommand> =
                    self.poll.on_failed(origin, now).into_iter().collect();
                if origin == RefreshOrigin::Manual {
                    commands.push(self.set_notice(
                        NoticeKind::Error,
                        format!("Refresh failed: {err}"),
                        now,
                    ));
                }
                commands
            }
        }
    }

    fn on_run_triggered(
        &mut self,
        workflow: String,
        result: Result<TriggeredRun, ApiError>,
        now: Instant,
    ) -> Vec<AppCommand> {
        match result {
            Ok(run) => {
                tracing::info!(run_id = %run.id, workflow = %run.workflow_name, "run triggered");
                self.runs.insert_running(
                    &run.id,
                    &run.workflow_name,
                    Utc::now(),
                    self.last_fetch_seq,
                );
                let mut commands = vec![self.hint.arm(&run.id, &run.workflow_name, now)];
                if !self.reauth_required {
                    commands.extend(self.poll.activate(now));
                }
                commands.push(self.set_notice(
                    NoticeKind::Info,
                    format!("Started {} ({}). Ctrl+X to cancel", run.workflow_name, run.id),
                    now,
                ));
                commands
            }
            Err(err) if err.is_auth_expired() => self.on_auth_expired(now),
            Err(ApiError::Validation(message)) => {
                vec![self.set_notice(NoticeKind::Error, message, now)]
            }
            Err(err) => vec![self.set_notice(
                NoticeKind::Error,
                format!("Failed to start {workflow}: {err}"),
                now,
            )],
        }
    }

    fn on_cancel_finished(
        &mut self,
        run_id: String,
        result: Result<(), ApiError>,
        now: Instant,
    ) -> Vec<AppCommand> {
        let cleared = self.hint.on_cancel_finished(&run_id);
        let label = cleared
            .map(|hint| format!("{} ({})", hint.workflow_name, hint.run_id))
            .unwrap_or_else(|| run_id.clone());
        match result {
            Ok(()) => {
                let notice = self.set_notice(NoticeKind::Info, format!("Cancelled {label}"), now);
                vec![notice, self.fetch_runs(RefreshOrigin::Manual)]
            }
            Err(err) if err.is_not_found() => vec![self.set_notice(
                NoticeKind::Info,
                format!("Run {label} already finished"),
                now,
            )],
            Err(err) if err.is_auth_expired() => self.on_auth_expired(now),
            Err(err) => {
                tracing::warn!(%run_id, "cancel failed: {err}");
                vec![self.set_notice(
                    NoticeKind::Error,
                    format!("Failed to cancel {label}: {err}"),
                    now,
                )]
            }
        }
    }

    /// Credentials were rejected. Streams and the poll chain are dropped;
    /// run counts and conversations stay as they are.
    fn on_auth_expired(&mut self, now: Instant) -> Vec<AppCommand> {
        tracing::warn!("server rejected credentials");
        self.poll.abandon();
        let mut commands = self.teardown_streams();
        if !self.reauth_required {
            self.reauth_required = true;
            commands.push(self.set_notice(
                NoticeKind::Auth,
                "Session expired. Run /login or press Ctrl+A to re-authenticate",
                now,
            ));
        }
        commands
    }

    fn blocked_by_auth(&mut self, now: Instant) -> Option<Vec<AppCommand>> {
        if !self.reauth_required {
            return None;
        }
        Some(vec![self.set_notice(
            NoticeKind::Auth,
            "Re-authenticate first (/login or Ctrl+A)",
            now,
        )])
    }

    fn teardown_streams(&mut self) -> Vec<AppCommand> {
        self.assembler
            .teardown_all()
            .into_iter()
            .map(|(target, generation)| AppCommand::AbortStream { target, generation })
            .collect()
    }

    fn fetch_runs(&mut self, origin: RefreshOrigin) -> AppCommand {
        self.last_fetch_seq += 1;
        AppCommand::FetchRuns {
            origin,
            seq: self.last_fetch_seq,
        }
    }

    fn set_notice(&mut self, kind: NoticeKind, text: impl Into<String>, now: Instant) -> AppCommand {
        self.next_notice_id += 1;
        let id = self.next_notice_id;
        self.notice = Some(Notice {
            id,
            kind,
            text: text.into(),
        });
        AppCommand::schedule(now + self.settings.notice_ttl, AppEvent::NoticeExpired { id })
    }

    pub(crate) fn snapshot(&self, now: Instant) -> CoreSnapshot<'_> {
        let hint = self.hint.hint().map(|hint| HintView {
            run_id: hint.run_id.clone(),
            workflow_name: hint.workflow_name.clone(),
            remaining: self.hint.remaining(now).unwrap_or_default(),
            cancel_requested: hint.cancel_requested,
        });
        let mut confirmations = self.gate.pending();
        confirmations.sort_by_key(|action| *action as u8);
        CoreSnapshot {
            target: &self.target,
            messages: self.assembler.messages(&self.target),
            is_streaming: self.assembler.is_streaming(&self.target),
            streaming_elsewhere: self
                .assembler
                .streaming_targets()
                .into_iter()
                .filter(|t| t != &self.target)
                .collect(),
            counts: self.runs.counts(),
            buckets: self.runs.buckets(),
            hint,
            confirmations,
            notice: self.notice.as_ref(),
            reauth_required: self.reauth_required,
            polling: self.poll.is_active(),
        }
    }
}
