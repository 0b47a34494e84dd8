use std::fmt;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Where a chat message is routed: the main orchestrator conversation or a
/// named sub-agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChatTarget {
    Main,
    Agent(String),
}

impl ChatTarget {
    pub fn agent(name: impl Into<String>) -> Self {
        ChatTarget::Agent(name.into())
    }
}

impl fmt::Display for ChatTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatTarget::Main => f.write_str("main"),
            ChatTarget::Agent(name) => write!(f, "@{name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[serde(alias = "pending", alias = "queued")]
    Running,
    #[serde(alias = "succeeded", alias = "success")]
    Completed,
    #[serde(alias = "cancelled", alias = "canceled", alias = "error")]
    Failed,
}

/// A background workflow execution as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRun {
    pub id: String,
    #[serde(alias = "workflow")]
    pub workflow_name: String,
    pub status: RunStatus,
    /// Only meaningful once the run left `Running`.
    #[serde(default)]
    pub success: bool,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub output: Option<String>,
}

impl TaskRun {
    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }
}

/// The list endpoint returns either a bare array or an envelope.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RunListResponse {
    Bare(Vec<TaskRun>),
    Envelope { runs: Vec<TaskRun> },
}

impl From<RunListResponse> for Vec<TaskRun> {
    fn from(value: RunListResponse) -> Self {
        match value {
            RunListResponse::Bare(runs) | RunListResponse::Envelope { runs } => runs,
        }
    }
}

/// Result of a successful trigger call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggeredRun {
    pub id: String,
    pub workflow_name: String,
}

/// One typed event from a chat stream, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The server picked the agent that answers this message.
    Route { agent: String },
    Chunk { text: String },
    Done,
    Error { message: String },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error { .. })
    }
}
