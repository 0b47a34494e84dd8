use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::PoisonError;

use async_trait::async_trait;

use crate::backend::ConductorBackend;
use crate::error::ApiError;
use crate::error::Result;
use crate::sse::ChatStream;
use crate::types::ChatTarget;
use crate::types::StreamEvent;
use crate::types::TaskRun;
use crate::types::TriggeredRun;

/// Scripted backend. Each queue is consumed front to back; an empty queue
/// answers with a `Server` error so missing expectations are visible.
#[derive(Default)]
pub struct MockBackend {
    list_results: Mutex<VecDeque<Result<Vec<TaskRun>>>>,
    trigger_results: Mutex<VecDeque<Result<String>>>,
    cancel_results: Mutex<VecDeque<Result<()>>>,
    streams: Mutex<VecDeque<Result<Vec<Result<StreamEvent>>>>>,
    calls: Mutex<Vec<MockCall>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    ListRuns,
    TriggerRun(String),
    CancelRun(String),
    StreamChat { target: ChatTarget, prompt: String },
}

fn pop<T>(queue: &Mutex<VecDeque<Result<T>>>, what: &str) -> Result<T> {
    queue
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .pop_front()
        .unwrap_or_else(|| {
            Err(ApiError::Server {
                status: 500,
                message: format!("no scripted {what} response"),
            })
        })
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_list(&self, result: Result<Vec<TaskRun>>) {
        self.list_results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(result);
    }

    pub fn push_trigger(&self, result: Result<String>) {
        self.trigger_results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(result);
    }

    pub fn push_cancel(&self, result: Result<()>) {
        self.cancel_results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(result);
    }

    pub fn push_stream(&self, result: Result<Vec<Result<StreamEvent>>>) {
        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(result);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, call: MockCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
    }
}

#[async_trait]
impl ConductorBackend for MockBackend {
    async fn list_runs(&self) -> Result<Vec<TaskRun>> {
        self.record(MockCall::ListRuns);
        pop(&self.list_results, "list")
    }

    async fn trigger_run(&self, workflow: &str) -> Result<TriggeredRun> {
        self.record(MockCall::TriggerRun(workflow.to_string()));
        pop(&self.trigger_results, "trigger").map(|id| TriggeredRun {
            id,
            workflow_name: workflow.to_string(),
        })
    }

    async fn cancel_run(&self, run_id: &str) -> Result<()> {
        self.record(MockCall::CancelRun(run_id.to_string()));
        pop(&self.cancel_results, "cancel")
    }

    async fn stream_chat(&self, target: &ChatTarget, prompt: &str) -> Result<ChatStream> {
        self.record(MockCall::StreamChat {
            target: target.clone(),
            prompt: prompt.to_string(),
        });
        pop(&self.streams, "stream").map(ChatStream::from_events)
    }
}
