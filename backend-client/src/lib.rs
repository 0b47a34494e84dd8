//! HTTP and SSE transport for the Conductor orchestration server.

mod backend;
mod client;
mod error;
#[cfg(any(test, feature = "mock"))]
mod mock;
mod sse;
mod types;

pub use backend::ConductorBackend;
pub use client::HttpClient;
pub use error::ApiError;
pub use error::Result;
#[cfg(any(test, feature = "mock"))]
pub use mock::MockBackend;
#[cfg(any(test, feature = "mock"))]
pub use mock::MockCall;
pub use sse::ChatStream;
pub use types::ChatTarget;
pub use types::RunStatus;
pub use types::StreamEvent;
pub use types::TaskRun;
pub use types::TriggeredRun;
