use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApiError>;

/// Failure classes surfaced by the orchestration server transport.
///
/// The variants map one-to-one onto how the client reacts: transport and
/// server failures are reported, `AuthExpired` triggers re-authentication,
/// `Validation` is shown verbatim and `NotFound` is benign for cancels.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Connection refused, DNS failure, request timeout.
    #[error("connection failed: {0}")]
    Transport(String),

    #[error("credentials expired or rejected ({status})")]
    AuthExpired { status: u16 },

    #[error("{0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("unexpected response body: {0}")]
    Decode(String),

    /// The event stream broke mid-flight (malformed framing, early close,
    /// idle timeout).
    #[error("stream error: {0}")]
    Stream(String),
}

impl ApiError {
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, ApiError::AuthExpired { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }

    /// Classify a non-success HTTP response. `body` is the raw response text.
    pub(crate) fn from_status(status: StatusCode, body: &str) -> Self {
        let message = extract_error_message(body);
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::AuthExpired {
                status: status.as_u16(),
            },
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                ApiError::Validation(message)
            }
            StatusCode::NOT_FOUND => ApiError::NotFound(message),
            _ => ApiError::Server {
                status: status.as_u16(),
                message,
            },
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            ApiError::from_status(status, "")
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Nested { error: ErrorDetail },
    Flat { error: String },
    Message { message: String },
    Detail { detail: String },
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Pull a human readable message out of the common JSON error shapes, falling
/// back to the raw body.
fn extract_error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody::Nested { error }) => error.message,
        Ok(ErrorBody::Flat { error }) => error,
        Ok(ErrorBody::Message { message }) => message,
        Ok(ErrorBody::Detail { detail }) => detail,
        Err(_) => body.trim().to_string(),
    }
}
