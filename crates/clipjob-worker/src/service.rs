//! Producer-side facade: enqueue, manual retry and status reads.

use clipjob_models::{Job, JobId, JobPatch, JobStatus, TransitionError};
use clipjob_queue::{JobQueue, JobStore, QueueError};
use serde_json::Value;
use tracing::info;

use crate::error::WorkerResult;
use crate::metrics;

/// Job submission service.
#[derive(Clone)]
pub struct JobService {
    store: JobStore,
    queue: JobQueue,
}

impl JobService {
    pub fn new(store: JobStore, queue: JobQueue) -> Self {
        Self { store, queue }
    }

    /// Create and queue a job, unless one is already live for the key.
    ///
    /// A queued or processing job under `correlation_key` is returned as is.
    /// The lookup and the create are separate calls, so two racing enqueues
    /// can both create; the job that loses the index still runs to a visible
    /// terminal state.
    pub async fn enqueue(&self, provider: &str, correlation_key: &str, payload: Value) -> WorkerResult<Job> {
        if let Some(existing) = self.live_job(correlation_key).await? {
            return Ok(existing);
        }
        let job = self.store.create(correlation_key, provider, payload).await?;
        self.push(job).await
    }

    /// [`enqueue`](Self::enqueue) with a per-job attempt budget.
    pub async fn enqueue_with_max_attempts(
        &self,
        provider: &str,
        correlation_key: &str,
        payload: Value,
        max_attempts: u32,
    ) -> WorkerResult<Job> {
        if let Some(existing) = self.live_job(correlation_key).await? {
            return Ok(existing);
        }
        let job = self
            .store
            .create_with_max_attempts(correlation_key, provider, payload, max_attempts)
            .await?;
        self.push(job).await
    }

    /// Requeue a failed job that still has attempts left.
    ///
    /// Meant for jobs failed permanently by configuration errors, once the
    /// configuration is fixed. Only `failed` jobs qualify: a queued or
    /// processing job already has an owner or a place in line.
    pub async fn retry(&self, id: &JobId) -> WorkerResult<Job> {
        let current = self.store.require(id).await?;
        if current.status != JobStatus::Failed {
            return Err(QueueError::from(TransitionError::InvalidTransition {
                job_id: id.to_string(),
                from: current.status,
                to: JobStatus::Queued,
            })
            .into());
        }
        let job = self.store.update(id, &JobPatch::requeued()).await?;
        self.queue.push(&job.id).await?;
        info!(job_id = %job.id, attempts = job.attempts, "Job manually requeued");
        Ok(job)
    }

    pub async fn status(&self, id: &JobId) -> WorkerResult<Option<Job>> {
        Ok(self.store.get(id).await?)
    }

    pub async fn status_for(&self, correlation_key: &str) -> WorkerResult<Option<Job>> {
        Ok(self.store.get_by_correlation_key(correlation_key).await?)
    }

    async fn live_job(&self, correlation_key: &str) -> WorkerResult<Option<Job>> {
        let existing = self.store.get_by_correlation_key(correlation_key).await?;
        Ok(existing.filter(|job| matches!(job.status, JobStatus::Queued | JobStatus::Processing)))
    }

    async fn push(&self, job: Job) -> WorkerResult<Job> {
        // A crash here leaves a queued record nobody pops; enqueue again to recover
        self.queue.push(&job.id).await?;
        metrics::record_enqueued(&job.provider);
        info!(
            job_id = %job.id,
            correlation_key = %job.correlation_key,
            provider = %job.provider,
            "Job enqueued"
        );
        Ok(job)
    }
}
