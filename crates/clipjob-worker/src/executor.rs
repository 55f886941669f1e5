//! Job executor.

use std::sync::Arc;

use clipjob_models::JobId;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::metrics;
use crate::retry::FailureTracker;
use crate::runner::{JobRunner, RunOutcome};

/// Pops jobs from the queue and runs them, bounded by a semaphore.
pub struct JobExecutor {
    config: WorkerConfig,
    runner: JobRunner,
    job_semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
    worker_name: String,
}

impl JobExecutor {
    pub fn new(config: WorkerConfig, runner: JobRunner) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let worker_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            runner,
            job_semaphore,
            shutdown: CancellationToken::new(),
            worker_name,
        }
    }

    /// Token cancelled on shutdown; running jobs observe it too.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn worker_name(&self) -> &str {
        &self.worker_name
    }

    /// Consume jobs until shutdown, then wait for running jobs to hand back.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' with {} max concurrent jobs",
            self.worker_name, self.config.max_concurrent_jobs
        );

        let mut pop_failures = FailureTracker::new(3);

        loop {
            let permit = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                permit = Arc::clone(&self.job_semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let popped = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                popped = self.runner.queue().pop() => popped,
            };

            match popped {
                Ok(Some(id)) => {
                    pop_failures.record_success();
                    let runner = self.runner.clone();
                    let cancel = self.shutdown.clone();
                    let semaphore = Arc::clone(&self.job_semaphore);
                    let max = self.config.max_concurrent_jobs;

                    metrics::set_in_progress(max - semaphore.available_permits());
                    tokio::spawn(async move {
                        let _permit = permit;
                        execute_job(&runner, id, &cancel).await;
                        metrics::set_in_progress(max - semaphore.available_permits() - 1);
                    });
                }
                Ok(None) => {
                    pop_failures.record_success();
                    drop(permit);
                    self.idle().await;
                }
                Err(e) => {
                    drop(permit);
                    if pop_failures.record_failure() {
                        error!("Failed to pop from queue: {}", e);
                    }
                    self.idle().await;
                }
            }
        }

        info!("Shutdown signal received, waiting for in-flight jobs...");
        let all = self.config.max_concurrent_jobs as u32;
        match tokio::time::timeout(
            self.config.shutdown_timeout,
            self.job_semaphore.acquire_many(all),
        )
        .await
        {
            Ok(_) => info!("Job executor stopped"),
            Err(_) => warn!(
                "Shutdown timed out after {:?}; unfinished jobs will be reclaimed by the stale sweep",
                self.config.shutdown_timeout
            ),
        }
        Ok(())
    }

    /// Pop and run one job inline. `None` when the queue is empty.
    pub async fn process_next(&self) -> WorkerResult<Option<RunOutcome>> {
        let Some(id) = self.runner.queue().pop().await? else {
            return Ok(None);
        };
        Ok(execute_job(&self.runner, id, &self.shutdown).await)
    }

    async fn idle(&self) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(self.config.idle_backoff) => {}
        }
    }
}

/// Claim a popped ID and run it. Problems are logged, never propagated.
async fn execute_job(runner: &JobRunner, id: JobId, cancel: &CancellationToken) -> Option<RunOutcome> {
    let job = match runner.store().claim(&id).await {
        Ok(job) => job,
        Err(e) if e.is_retryable() => {
            warn!(job_id = %id, "Claim failed, returning job to queue: {}", e);
            if let Err(e) = runner.queue().requeue(&id).await {
                error!(job_id = %id, "Failed to requeue job: {}", e);
            }
            return None;
        }
        Err(e) => {
            // Expired record, or a duplicate ID for a job that moved on
            warn!(job_id = %id, "Dropping unclaimable job: {}", e);
            if let Err(e) = runner.queue().mark_done(&id).await {
                error!(job_id = %id, "Failed to release job: {}", e);
            }
            return None;
        }
    };

    debug!(job_id = %id, attempt = job.attempts, "Claimed job");

    match runner.run(job, cancel).await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            error!(job_id = %id, "Job write-back failed: {}", e);
            None
        }
    }
}
