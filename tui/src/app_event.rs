use std::time::Instant;

use conductor_backend_client::ApiError;
use conductor_backend_client::ChatTarget;
use conductor_backend_client::StreamEvent;
use conductor_backend_client::TaskRun;
use conductor_backend_client::TriggeredRun;
use crossterm::event::KeyEvent;

/// Destructive actions that go through the double-press confirmation gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ConfirmAction {
    Quit,
    ClearConversation,
}

impl ConfirmAction {
    pub(crate) fn prompt(self) -> &'static str {
        match self {
            ConfirmAction::Quit => "Quit again to exit (Ctrl+D or /quit)",
            ConfirmAction::ClearConversation => "Press again to clear this conversation",
        }
    }
}

/// Why a run list fetch was issued. Poll fetches carry the chain that
/// scheduled them so results from an abandoned chain never extend it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefreshOrigin {
    Poll { chain: u64 },
    Manual,
}

/// Intent produced by the composer and key bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum UserAction {
    SubmitPrompt(String),
    SelectTarget(ChatTarget),
    TriggerWorkflow(String),
    CancelMostRecentRun,
    RefreshRuns,
    /// Mark every run that needs attention as seen.
    AcknowledgeRuns,
    ClearConversation,
    /// Stop the response streaming into the active conversation.
    AbortStream,
    Reauthenticate,
    Quit,
    /// Input that looked like a command but could not be parsed.
    Unrecognized(String),
}

/// Every message the central loop consumes. Terminal events are handled by
/// `App`; everything else is routed to the `Coordinator`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AppEvent {
    KeyEvent(KeyEvent),

    /// Text pasted from the terminal clipboard.
    Paste(String),

    /// Request a redraw which will be debounced by the [`App`](crate::app::App).
    RequestRedraw,

    /// Actually draw the next frame.
    Redraw,

    /// Request to exit the application gracefully.
    ExitRequest,

    Action(UserAction),

    /// One item from the chat stream opened for `(target, generation)`.
    Chat {
        target: ChatTarget,
        generation: u64,
        item: Result<StreamEvent, ApiError>,
    },

    /// Result of the run list fetch numbered `seq`.
    RunsRefreshed {
        origin: RefreshOrigin,
        seq: u64,
        result: Result<Vec<TaskRun>, ApiError>,
    },

    RunTriggered {
        workflow: String,
        result: Result<TriggeredRun, ApiError>,
    },

    RunCancelFinished {
        run_id: String,
        result: Result<(), ApiError>,
    },

    AuthRestored,
    AuthRestoreFailed(String),

    /// Timer: next tick of poll chain `chain`.
    PollTick { chain: u64 },

    /// Timer: check whether the cancellation hint has expired.
    CancelHintExpired,

    /// Timer: check whether a pending confirmation has expired.
    ConfirmExpired(ConfirmAction),

    /// Timer: drop the transient notice `id` if it is still showing.
    NoticeExpired { id: u64 },
}

/// Asynchronous work requested by the coordinator. The
/// [`CommandRunner`](crate::command_runner::CommandRunner) executes these off
/// the loop and reports back through [`AppEvent`]s.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AppCommand {
    SendChat {
        target: ChatTarget,
        generation: u64,
        prompt: String,
    },
    /// Close the connection behind `(target, generation)`.
    AbortStream { target: ChatTarget, generation: u64 },
    /// Fetch the run list. `seq` increases with every fetch issued.
    FetchRuns { origin: RefreshOrigin, seq: u64 },
    TriggerRun { workflow: String },
    CancelRun { run_id: String },
    Reauthenticate,
    /// Deliver `event` back to the loop at the absolute time `at`.
    ScheduleAt { at: Instant, event: Box<AppEvent> },
    Exit,
}

impl AppCommand {
    pub(crate) fn schedule(at: Instant, event: AppEvent) -> Self {
        AppCommand::ScheduleAt {
            at,
            event: Box::new(event),
        }
    }
}
