use std::time::Duration;

use futures::TryStreamExt;
use reqwest::header::ACCEPT;
use reqwest::header::AUTHORIZATION;
use reqwest::header::CONTENT_TYPE;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderValue;
use reqwest::header::USER_AGENT;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::trace;

use crate::error::ApiError;
use crate::error::Result;
use crate::sse::ChatStream;
use crate::sse::process_sse;
use crate::types::ChatTarget;
use crate::types::RunListResponse;
use crate::types::TaskRun;
use crate::types::TriggeredRun;

const DEFAULT_USER_AGENT: &str = "conductor-tui";
const DEFAULT_STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Authenticated HTTP transport for the orchestration server.
#[derive(Clone, Debug)]
pub struct HttpClient {
    base_url: String,
    http: reqwest::Client,
    bearer_token: Option<String>,
    user_agent: Option<HeaderValue>,
    stream_idle_timeout: Duration,
}

impl HttpClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self {
            base_url,
            http,
            bearer_token: None,
            user_agent: None,
            stream_idle_timeout: DEFAULT_STREAM_IDLE_TIMEOUT,
        })
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        if let Ok(hv) = HeaderValue::from_str(&ua.into()) {
            self.user_agent = Some(hv);
        }
        self
    }

    pub fn with_stream_idle_timeout(mut self, idle: Duration) -> Self {
        self.stream_idle_timeout = idle;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn headers(&self) -> HeaderMap {
        let mut h = HeaderMap::new();
        if let Some(ua) = &self.user_agent {
            h.insert(USER_AGENT, ua.clone());
        } else {
            h.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        }
        if let Some(token) = &self.bearer_token
            && let Ok(hv) = HeaderValue::from_str(&format!("Bearer {token}"))
        {
            h.insert(AUTHORIZATION, hv);
        }
        h
    }

    async fn exec_request(
        &self,
        req: reqwest::RequestBuilder,
        method: &str,
        url: &str,
    ) -> Result<String> {
        let res = req.send().await?;
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        if !status.is_success() {
            debug!("{method} {url} failed: {status}; body={body}");
            return Err(ApiError::from_status(status, &body));
        }
        trace!("{method} {url} -> {status}");
        Ok(body)
    }

    fn decode_json<T: DeserializeOwned>(&self, url: &str, body: &str) -> Result<T> {
        serde_json::from_str::<T>(body)
            .map_err(|e| ApiError::Decode(format!("{url}: {e}; body={body}")))
    }

    fn chat_url(&self, target: &ChatTarget) -> String {
        match target {
            ChatTarget::Main => format!("{}/api/chat/stream", self.base_url),
            ChatTarget::Agent(name) => format!(
                "{}/api/agents/{}/chat/stream",
                self.base_url,
                urlencoding::encode(name)
            ),
        }
    }

    /// Fetch the full, authoritative run set.
    pub async fn list_runs(&self) -> Result<Vec<TaskRun>> {
        let url = format!("{}/api/runs", self.base_url);
        let req = self.http.get(&url).headers(self.headers());
        let body = self.exec_request(req, "GET", &url).await?;
        let parsed: RunListResponse = self.decode_json(&url, &body)?;
        Ok(parsed.into())
    }

    /// Start a workflow run and return its id.
    pub async fn trigger_run(&self, workflow: &str) -> Result<TriggeredRun> {
        let url = format!(
            "{}/api/workflows/{}/runs",
            self.base_url,
            urlencoding::encode(workflow)
        );
        let req = self
            .http
            .post(&url)
            .headers(self.headers())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .json(&serde_json::json!({}));
        let body = self.exec_request(req, "POST", &url).await?;
        // Prefer `run.id`; fall back to a top-level `id`.
        let value: serde_json::Value = self.decode_json(&url, &body)?;
        let id = value
            .get("run")
            .and_then(|r| r.get("id"))
            .or_else(|| value.get("id"))
            .and_then(|id| id.as_str())
            .ok_or_else(|| ApiError::Decode(format!("POST {url} returned no run id; body={body}")))?;
        Ok(TriggeredRun {
            id: id.to_string(),
            workflow_name: workflow.to_string(),
        })
    }

    /// Request cancellation. A run that already finished answers 404, which
    /// surfaces as `ApiError::NotFound`.
    pub async fn cancel_run(&self, run_id: &str) -> Result<()> {
        let url = format!(
            "{}/api/runs/{}/cancel",
            self.base_url,
            urlencoding::encode(run_id)
        );
        let req = self.http.post(&url).headers(self.headers());
        self.exec_request(req, "POST", &url).await?;
        Ok(())
    }

    /// Open a chat stream. Non-2xx responses fail here; everything after the
    /// headers arrives through the returned [`ChatStream`].
    pub async fn stream_chat(&self, target: &ChatTarget, prompt: &str) -> Result<ChatStream> {
        let url = self.chat_url(target);
        let res = self
            .http
            .post(&url)
            .headers(self.headers())
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .json(&serde_json::json!({ "message": prompt }))
            .send()
            .await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            debug!("POST {url} failed: {status}; body={body}");
            return Err(ApiError::from_status(status, &body));
        }

        let (tx_event, rx_event) = mpsc::channel::<Result<crate::StreamEvent>>(256);
        let stream = res.bytes_stream().map_err(ApiError::from);
        tokio::spawn(process_sse(stream, tx_event, self.stream_idle_timeout));
        Ok(ChatStream { rx_event })
    }
}
