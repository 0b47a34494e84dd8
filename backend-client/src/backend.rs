use async_trait::async_trait;

use crate::client::HttpClient;
use crate::error::Result;
use crate::sse::ChatStream;
use crate::types::ChatTarget;
use crate::types::TaskRun;
use crate::types::TriggeredRun;

/// Operations the coordination core needs from the server. Implemented by
/// [`HttpClient`] and, for tests, by `MockBackend`.
#[async_trait]
pub trait ConductorBackend: Send + Sync {
    async fn list_runs(&self) -> Result<Vec<TaskRun>>;
    async fn trigger_run(&self, workflow: &str) -> Result<TriggeredRun>;
    async fn cancel_run(&self, run_id: &str) -> Result<()>;
    async fn stream_chat(&self, target: &ChatTarget, prompt: &str) -> Result<ChatStream>;
}

#[async_trait]
impl ConductorBackend for HttpClient {
    async fn list_runs(&self) -> Result<Vec<TaskRun>> {
        HttpClient::list_runs(self).await
    }

    async fn trigger_run(&self, workflow: &str) -> Result<TriggeredRun> {
        HttpClient::trigger_run(self, workflow).await
    }

    async fn cancel_run(&self, run_id: &str) -> Result<()> {
        HttpClient::cancel_run(self, run_id).await
    }

    async fn stream_chat(&self, target: &ChatTarget, prompt: &str) -> Result<ChatStream> {
        HttpClient::stream_chat(self, target, prompt).await
    }
}
