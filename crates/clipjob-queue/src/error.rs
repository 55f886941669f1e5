//! Queue error types.

use clipjob_models::TransitionError;
use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Rejected job update: {0}")]
    Transition(#[from] TransitionError),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::JobNotFound(id.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// True if the record does not exist (never created or expired).
    pub fn is_not_found(&self) -> bool {
        matches!(self, QueueError::JobNotFound(_))
    }

    /// Check if error is retryable.
    ///
    /// Rejected transitions, missing records and corrupt payloads will fail
    /// the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueueError::ConnectionFailed(_) | QueueError::Backend(_) | QueueError::Redis(_)
        )
    }
}
