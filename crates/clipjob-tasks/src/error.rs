//! Task API error types.

use std::time::Duration;

use thiserror::Error;

pub type TaskApiResult<T> = Result<T, TaskApiError>;

#[derive(Debug, Error)]
pub enum TaskApiError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Provider returned {status}: {body}")]
    Server { status: u16, body: String },

    #[error("Provider rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TaskApiError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Map a non-success HTTP status to an error.
    pub fn from_http_status(status: u16, body: impl Into<String>, retry_after: Option<Duration>) -> Self {
        match status {
            429 => Self::RateLimited { retry_after },
            500..=599 => Self::Server {
                status,
                body: body.into(),
            },
            _ => Self::Rejected {
                status,
                body: body.into(),
            },
        }
    }

    /// Check if error is transient (worth polling again).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TaskApiError::Network(_) | TaskApiError::RateLimited { .. } | TaskApiError::Server { .. }
        )
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, TaskApiError::RateLimited { .. })
    }

    /// Provider-requested wait, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TaskApiError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}
