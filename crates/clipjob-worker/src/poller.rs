//! Poll-until-complete loop for one external task.
//!
//! Two failure budgets are kept apart here. A task that reports `error` is a
//! business failure and comes back as [`PollOutcome::Failed`]; the job's
//! attempt budget decides what happens next. A status endpoint that cannot
//! be reached is an infrastructure failure, tolerated up to
//! `max_consecutive_errors` in a row and then surfaced as
//! [`PollError::TooManyErrors`].

use std::future::Future;
use std::time::Duration;

use clipjob_models::TaskState;
use clipjob_tasks::{PollPolicy, TaskApi, TaskApiError};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::WorkerError;
use crate::metrics;

/// Longest honoured `Retry-After`, in multiples of the policy's rate-limit wait.
const MAX_RETRY_AFTER_FACTOR: u32 = 5;

/// Terminal answer from the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Ready { output_ref: String },
    Failed { reason: String },
}

/// Polling stopped without a terminal answer.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("Status check failed {count} consecutive times: {last}")]
    TooManyErrors { count: u32, last: TaskApiError },

    #[error("Task did not finish within {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error("Status check failed: {0}")]
    Fatal(TaskApiError),

    #[error("Polling cancelled")]
    Cancelled,
}

impl From<PollError> for WorkerError {
    fn from(e: PollError) -> Self {
        match e {
            PollError::TooManyErrors { count, last } => WorkerError::TooManyPollErrors { count, last },
            PollError::Timeout { elapsed } => WorkerError::Timeout(elapsed),
            PollError::Fatal(e) => WorkerError::TaskApi(e),
            PollError::Cancelled => WorkerError::Cancelled,
        }
    }
}

/// Drives status checks for one task under a [`PollPolicy`].
#[derive(Debug, Clone)]
pub struct Poller {
    policy: PollPolicy,
}

impl Poller {
    pub fn new(policy: PollPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Poll `task_id` until it is ready or errored.
    ///
    /// `on_progress` runs after every non-terminal answer with the reported
    /// progress, if any. Every wait races `cancel` and the global deadline.
    pub async fn poll_until_complete<F, Fut>(
        &self,
        api: &dyn TaskApi,
        task_id: &str,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<PollOutcome, PollError>
    where
        F: FnMut(Option<u8>) -> Fut,
        Fut: Future<Output = ()>,
    {
        let started = Instant::now();
        let deadline = started + self.policy.timeout;
        let mut consecutive_errors = 0u32;
        let mut pending_polls = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(PollError::Cancelled);
            }
            if Instant::now() >= deadline {
                return Err(PollError::Timeout {
                    elapsed: started.elapsed(),
                });
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PollError::Cancelled),
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(PollError::Timeout { elapsed: started.elapsed() });
                }
                result = api.task_status(task_id) => result,
            };

            let wait = match result {
                Ok(status) => {
                    consecutive_errors = 0;
                    match status.state {
                        TaskState::Ready => {
                            return Ok(PollOutcome::Ready {
                                output_ref: status.output_ref.unwrap_or_else(|| task_id.to_string()),
                            });
                        }
                        TaskState::Error => {
                            return Ok(PollOutcome::Failed {
                                reason: status
                                    .error
                                    .unwrap_or_else(|| format!("{} task {} failed", api.name(), task_id)),
                            });
                        }
                        TaskState::Processing => {
                            pending_polls += 1;
                            debug!(
                                task_id,
                                provider = api.name(),
                                polls = pending_polls,
                                progress = ?status.progress,
                                "Task still processing"
                            );
                            on_progress(status.progress).await;
                            self.policy.poll_interval
                        }
                    }
                }
                Err(e) if e.is_transient() => {
                    consecutive_errors += 1;
                    metrics::record_poll_error(api.name(), e.is_rate_limited());

                    if consecutive_errors > self.policy.max_consecutive_errors {
                        warn!(
                            task_id,
                            provider = api.name(),
                            errors = consecutive_errors,
                            "Giving up on status checks: {}", e
                        );
                        return Err(PollError::TooManyErrors {
                            count: consecutive_errors,
                            last: e,
                        });
                    }

                    let wait = self.wait_after_error(&e);
                    warn!(
                        task_id,
                        provider = api.name(),
                        errors = consecutive_errors,
                        "Status check failed, retrying in {:?}: {}", wait, e
                    );
                    wait
                }
                Err(e) => return Err(PollError::Fatal(e)),
            };

            let wake = (Instant::now() + wait).min(deadline);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PollError::Cancelled),
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    /// Rate limits wait the policy's rate-limit wait unless the provider
    /// asked for something specific. A provider's `Retry-After` is capped so
    /// heartbeats keep landing well inside the stale window.
    fn wait_after_error(&self, error: &TaskApiError) -> Duration {
        if error.is_rate_limited() {
            let cap = self.policy.rate_limit_wait * MAX_RETRY_AFTER_FACTOR;
            error
                .retry_after()
                .map_or(self.policy.rate_limit_wait, |wait| wait.min(cap))
        } else {
            self.policy.poll_interval
        }
    }
}
