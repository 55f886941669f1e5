//! Worker error types.

use std::time::Duration;

use clipjob_tasks::TaskApiError;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// The status endpoint kept failing; distinct from a task reporting an error.
    #[error("Status check failed {count} consecutive times: {last}")]
    TooManyPollErrors { count: u32, last: TaskApiError },

    #[error("Task did not finish within {0:?}")]
    Timeout(Duration),

    #[error("Job was cancelled")]
    Cancelled,

    #[error("No task API registered for provider '{0}'")]
    UnknownProvider(String),

    #[error("Task API error: {0}")]
    TaskApi(#[from] TaskApiError),

    #[error("Queue error: {0}")]
    Queue(#[from] clipjob_queue::QueueError),
}

impl WorkerError {
    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::TaskApi(e) => e.is_transient(),
            WorkerError::Queue(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Infrastructure failures of polling itself, as opposed to the task failing.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            WorkerError::TooManyPollErrors { .. } | WorkerError::Timeout(_) | WorkerError::Queue(_)
        )
    }

    /// Check if this is a permanent failure that should NOT be retried.
    ///
    /// The same job would fail the same way on another attempt.
    pub fn is_permanent_failure(&self) -> bool {
        match self {
            WorkerError::UnknownProvider(_) => true,
            WorkerError::TaskApi(e) => matches!(
                e,
                TaskApiError::InvalidRequest(_) | TaskApiError::Config(_)
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let poll = WorkerError::TooManyPollErrors {
            count: 6,
            last: TaskApiError::from_http_status(503, "down", None),
        };
        assert!(poll.is_infrastructure());
        assert!(!poll.is_permanent_failure());

        let unknown = WorkerError::UnknownProvider("vimeo".into());
        assert!(unknown.is_permanent_failure());
        assert!(!unknown.is_retryable());

        let transient = WorkerError::TaskApi(TaskApiError::from_http_status(429, "", None));
        assert!(transient.is_retryable());
    }
}
