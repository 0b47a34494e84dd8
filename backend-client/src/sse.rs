use std::pin::Pin;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::prelude::*;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;
use tracing::trace;

use crate::error::ApiError;
use crate::error::Result;
use crate::types::StreamEvent;

/// Ordered chat stream for one request. Dropping it closes the underlying
/// connection because the reader task stops once its receiver is gone.
pub struct ChatStream {
    pub(crate) rx_event: mpsc::Receiver<Result<StreamEvent>>,
}

impl ChatStream {
    /// Build a stream from an already-produced sequence. Used by mocks.
    pub fn from_events(events: Vec<Result<StreamEvent>>) -> Self {
        let (tx, rx_event) = mpsc::channel(events.len().max(1));
        for event in events {
            if tx.try_send(event).is_err() {
                break;
            }
        }
        Self { rx_event }
    }
}

impl Stream for ChatStream {
    type Item = Result<StreamEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx_event.poll_recv(cx)
    }
}

#[derive(Debug, Deserialize)]
struct SseData {
    #[serde(rename = "type")]
    kind: Option<String>,
    agent: Option<String>,
    text: Option<String>,
    message: Option<String>,
}

/// Read SSE frames from `stream` and forward typed events to `tx_event`
/// until a terminal event, a transport failure, or the receiver goes away.
///
/// Exactly one terminal item is sent: `Ok(Done)`, `Ok(Error { .. })`, or an
/// `Err` describing why the connection ended early.
pub(crate) async fn process_sse<S>(
    stream: S,
    tx_event: mpsc::Sender<Result<StreamEvent>>,
    idle_timeout: Duration,
) where
    S: Stream<Item = std::result::Result<Bytes, ApiError>> + Unpin,
{
    let mut stream = stream.eventsource();

    loop {
        let next = tokio::select! {
            // Receiver dropped: the stream was torn down on the client side.
            _ = tx_event.closed() => return,
            next = timeout(idle_timeout, stream.next()) => next,
        };
        let sse = match next {
            Ok(Some(Ok(sse))) => sse,
            Ok(Some(Err(e))) => {
                debug!("SSE error: {e:#}");
                let _ = tx_event.send(Err(ApiError::Stream(e.to_string()))).await;
                return;
            }
            Ok(None) => {
                let _ = tx_event
                    .send(Err(ApiError::Stream(
                        "stream closed before done".to_string(),
                    )))
                    .await;
                return;
            }
            Err(_) => {
                let _ = tx_event
                    .send(Err(ApiError::Stream(
                        "idle timeout waiting for SSE".to_string(),
                    )))
                    .await;
                return;
            }
        };

        trace!(event = %sse.event, data = %sse.data, "SSE event");

        let data = if sse.data.trim().is_empty() {
            None
        } else {
            match serde_json::from_str::<SseData>(&sse.data) {
                Ok(data) => Some(data),
                Err(e) => {
                    debug!("failed to parse SSE data: {e}");
                    let _ = tx_event
                        .send(Err(ApiError::Stream(format!("malformed event data: {e}"))))
                        .await;
                    return;
                }
            }
        };

        // `event:` wins; fall back to the JSON `type` for servers that only
        // emit `data:` lines (eventsource-stream reports those as "message").
        let kind = match (sse.event.as_str(), data.as_ref()) {
            ("" | "message", Some(SseData { kind: Some(kind), .. })) => kind.clone(),
            (event, _) => event.to_string(),
        };

        let event = match kind.as_str() {
            "route" => match data.and_then(|d| d.agent) {
                Some(agent) => StreamEvent::Route { agent },
                None => continue,
            },
            "chunk" => match data.and_then(|d| d.text) {
                Some(text) => StreamEvent::Chunk { text },
                None => {
                    let _ = tx_event
                        .send(Err(ApiError::Stream("chunk event without text".to_string())))
                        .await;
                    return;
                }
            },
            "done" => StreamEvent::Done,
            "error" => StreamEvent::Error {
                message: data
                    .and_then(|d| d.message)
                    .unwrap_or_else(|| "server reported an error".to_string()),
            },
            other => {
                debug!("ignoring SSE event kind {other}");
                continue;
            }
        };

        let terminal = event.is_terminal();
        if tx_event.send(Ok(event)).await.is_err() {
            return;
        }
        if terminal {
            return;
        }
    }
}
