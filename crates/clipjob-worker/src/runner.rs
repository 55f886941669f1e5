//! Runs one claimed job against its provider and settles it.
//!
//! Settling always pairs a store write with a queue operation:
//! - completed: `update(completed)` then `mark_done`
//! - failed: [`JobQueue::fail`], shared with the stale sweep
//! - cancelled with budget left: `update(queued)` then `requeue`
//!
//! The two structures are written separately. If the process dies in
//! between, the stale sweep reconciles them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clipjob_models::{Job, JobId, JobPatch, JobStatus};
use clipjob_queue::{JobQueue, JobStore, QueueError, QueueResult};
use clipjob_tasks::{TaskApi, TaskRegistry};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::poller::{PollOutcome, Poller};
use crate::retry::{retry_async, RetryConfig};

/// Error recorded on a job cancelled during its last attempt.
pub const CANCELLED_JOB_ERROR: &str = "Job was cancelled before the task finished.";

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { result: String },
    /// Failed with budget left and pushed back to the queue
    Requeued { error: String },
    /// Failed with no retry left
    Failed { error: String },
    /// Cancelled and returned to the queue without an error
    Released,
    /// The record moved on without us (reclaimed by the sweeper or expired)
    Abandoned,
}

/// Which side failed, for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Business,
    Infrastructure,
    Config,
    Cancelled,
}

impl FailureKind {
    fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Business => "business",
            FailureKind::Infrastructure => "infrastructure",
            FailureKind::Config => "config",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

/// Drives claimed jobs through create, poll and write-back.
#[derive(Clone)]
pub struct JobRunner {
    store: JobStore,
    queue: JobQueue,
    registry: TaskRegistry,
    write_retry: RetryConfig,
}

impl JobRunner {
    pub fn new(store: JobStore, queue: JobQueue, registry: TaskRegistry) -> Self {
        Self {
            store,
            queue,
            registry,
            write_retry: RetryConfig::new("job_write_back"),
        }
    }

    pub fn with_write_retry(mut self, write_retry: RetryConfig) -> Self {
        self.write_retry = write_retry;
        self
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Run a job that was just claimed (status `processing`).
    pub async fn run(&self, job: Job, cancel: &CancellationToken) -> WorkerResult<RunOutcome> {
        let logger = JobLogger::new(&job);
        let span = logger.create_span();
        self.run_logged(job, cancel, logger).instrument(span).await
    }

    async fn run_logged(
        &self,
        job: Job,
        cancel: &CancellationToken,
        logger: JobLogger,
    ) -> WorkerResult<RunOutcome> {
        logger.log_start(&format!("attempt {}/{}", job.attempts, job.max_attempts));
        metrics::record_started(&job.provider);

        let Some(api) = self.registry.get(&job.provider) else {
            let err = WorkerError::UnknownProvider(job.provider.clone());
            logger.log_error(&err.to_string());
            return self.fail_job(&job, &err.to_string(), FailureKind::Config, true).await;
        };

        let lost = Arc::new(AtomicBool::new(false));
        let started = Instant::now();

        match self.execute(&job, api.as_ref(), cancel, &lost, &logger).await {
            Ok(PollOutcome::Ready { output_ref }) => {
                let outcome = self.complete_job(&job, output_ref).await?;
                metrics::record_completed(&job.provider, started.elapsed());
                logger.log_completion(&format!("after {:?}", started.elapsed()));
                Ok(outcome)
            }
            Ok(PollOutcome::Failed { reason }) => {
                logger.log_error(&format!("task reported error: {}", reason));
                self.fail_job(&job, &reason, FailureKind::Business, false).await
            }
            Err(WorkerError::Cancelled) if lost.load(Ordering::SeqCst) => {
                logger.log_warning("job record changed underneath the runner, abandoning");
                Ok(RunOutcome::Abandoned)
            }
            Err(WorkerError::Cancelled) => self.release_job(&job, &logger).await,
            Err(e) => {
                let kind = if e.is_permanent_failure() {
                    FailureKind::Config
                } else if e.is_infrastructure() {
                    FailureKind::Infrastructure
                } else {
                    FailureKind::Business
                };
                logger.log_error(&e.to_string());
                self.fail_job(&job, &e.to_string(), kind, e.is_permanent_failure())
                    .await
            }
        }
    }

    /// Create the external task, record its ID, then poll it.
    async fn execute(
        &self,
        job: &Job,
        api: &dyn TaskApi,
        cancel: &CancellationToken,
        lost: &Arc<AtomicBool>,
        logger: &JobLogger,
    ) -> WorkerResult<PollOutcome> {
        let handle = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WorkerError::Cancelled),
            handle = api.create_task(&job.payload) => handle?,
        };
        debug!(job_id = %job.id, task_id = %handle.task_id, "External task created");

        self.store
            .update(&job.id, &JobPatch::external_task(&handle.task_id))
            .await?;

        // A failed heartbeat means the sweeper or TTL got to the record first
        let poll_cancel = cancel.child_token();
        let poller = Poller::new(api.poll_policy());
        let outcome = poller
            .poll_until_complete(api, &handle.task_id, &poll_cancel, |progress| {
                let store = self.store.clone();
                let job_id = job.id.clone();
                let poll_cancel = poll_cancel.clone();
                let lost = Arc::clone(lost);
                let logger = logger.clone();
                async move {
                    if let Some(progress) = progress {
                        logger.log_progress(&format!("{}%", progress));
                    }
                    let patch = JobPatch::progress(progress.unwrap_or(0));
                    match store.update(&job_id, &patch).await {
                        Ok(_) => {}
                        Err(e @ (QueueError::Transition(_) | QueueError::JobNotFound(_))) => {
                            warn!(job_id = %job_id, "Heartbeat rejected: {}", e);
                            lost.store(true, Ordering::SeqCst);
                            poll_cancel.cancel();
                        }
                        Err(e) => warn!(job_id = %job_id, "Heartbeat failed: {}", e),
                    }
                }
            })
            .await?;

        Ok(outcome)
    }

    async fn complete_job(&self, job: &Job, output_ref: String) -> WorkerResult<RunOutcome> {
        let patch = JobPatch::completed(output_ref.clone());
        self.write(|| self.store.update(&job.id, &patch)).await?;
        self.write(|| self.queue.mark_done(&job.id)).await?;
        Ok(RunOutcome::Completed { result: output_ref })
    }

    /// Record a failure and either requeue the job or release it for good.
    ///
    /// `permanent` skips the requeue even when attempts remain; the job stays
    /// `failed` and can be retried by hand.
    pub async fn fail_job(
        &self,
        job: &Job,
        error: &str,
        kind: FailureKind,
        permanent: bool,
    ) -> WorkerResult<RunOutcome> {
        let settled = self
            .write(|| self.queue.fail(&self.store, &job.id, error, !permanent))
            .await?;

        let retried = settled.status == JobStatus::Queued;
        metrics::record_failed(&job.provider, kind.as_str(), !retried);

        if retried {
            metrics::record_retried(&job.provider);
            warn!(
                job_id = %job.id,
                attempt = settled.attempts,
                max_attempts = settled.max_attempts,
                "Job failed, requeued: {}", error
            );
            Ok(RunOutcome::Requeued {
                error: error.to_string(),
            })
        } else {
            warn!(
                job_id = %job.id,
                attempts = settled.attempts,
                "Job permanently failed: {}", error
            );
            Ok(RunOutcome::Failed {
                error: error.to_string(),
            })
        }
    }

    /// Hand a cancelled job back without spending its remaining budget.
    async fn release_job(&self, job: &Job, logger: &JobLogger) -> WorkerResult<RunOutcome> {
        if !job.has_attempts_left() {
            logger.log_warning("cancelled on last attempt");
            return self
                .fail_job(job, CANCELLED_JOB_ERROR, FailureKind::Cancelled, true)
                .await;
        }

        self.requeue(&job.id).await?;
        logger.log_warning("cancelled, returned to queue");
        Ok(RunOutcome::Released)
    }

    async fn requeue(&self, id: &JobId) -> WorkerResult<()> {
        let patch = JobPatch::requeued();
        self.write(|| self.store.update(id, &patch)).await?;
        self.write(|| self.queue.requeue(id)).await?;
        Ok(())
    }

    async fn write<T, F, Fut>(&self, operation: F) -> WorkerResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = QueueResult<T>>,
    {
        retry_async(&self.write_retry, QueueError::is_retryable, operation)
            .await
            .map_err(WorkerError::from)
    }
}
