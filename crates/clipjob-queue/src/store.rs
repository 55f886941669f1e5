//! Durable job records keyed by job ID, plus a correlation-key index.

use std::sync::Arc;
use std::time::Duration;

use clipjob_models::{Job, JobId, JobPatch};
use tracing::debug;

use crate::backend::KvBackend;
use crate::config::{KeySpace, QueueConfig};
use crate::error::{QueueError, QueueResult};

/// Job record store.
///
/// Every write overwrites the whole record in a single `SET`, so readers
/// never see a partially applied update. Updates are read-modify-write and
/// assume a single worker per job at a time.
#[derive(Clone)]
pub struct JobStore {
    backend: Arc<dyn KvBackend>,
    keys: KeySpace,
    max_attempts: u32,
    record_ttl: Duration,
    terminal_ttl: Duration,
}

impl JobStore {
    pub fn new(backend: Arc<dyn KvBackend>, config: &QueueConfig) -> Self {
        Self {
            backend,
            keys: config.keys(),
            max_attempts: config.max_attempts,
            record_ttl: config.record_ttl,
            terminal_ttl: config.terminal_ttl,
        }
    }

    /// Create a queued job and point the correlation index at it.
    ///
    /// Any previous index entry for `correlation_key` is overwritten. Callers
    /// that must not run two live jobs per key check
    /// [`get_by_correlation_key`](Self::get_by_correlation_key) first.
    pub async fn create(
        &self,
        correlation_key: &str,
        provider: &str,
        payload: serde_json::Value,
    ) -> QueueResult<Job> {
        self.create_with_max_attempts(correlation_key, provider, payload, self.max_attempts)
            .await
    }

    /// [`create`](Self::create) with a per-job attempt budget.
    pub async fn create_with_max_attempts(
        &self,
        correlation_key: &str,
        provider: &str,
        payload: serde_json::Value,
        max_attempts: u32,
    ) -> QueueResult<Job> {
        let job = Job::new(correlation_key, provider, payload).with_max_attempts(max_attempts);
        self.write(&job).await?;

        // Outlive the record so the index never dangles while the record is readable
        let index_ttl = self.record_ttl + self.terminal_ttl;
        self.backend
            .set(&self.keys.index(correlation_key), job.id.as_str(), Some(index_ttl))
            .await?;

        debug!(job_id = %job.id, correlation_key, "Created job record");
        Ok(job)
    }

    /// Load a job. Expired and unknown IDs read as `None`.
    pub async fn get(&self, id: &JobId) -> QueueResult<Option<Job>> {
        match self.backend.get(&self.keys.job(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Load a job, failing with [`QueueError::JobNotFound`] if it is missing.
    pub async fn require(&self, id: &JobId) -> QueueResult<Job> {
        self.get(id)
            .await?
            .ok_or_else(|| QueueError::not_found(id.as_str()))
    }

    /// Resolve the correlation index, then load the job it points at.
    pub async fn get_by_correlation_key(&self, correlation_key: &str) -> QueueResult<Option<Job>> {
        match self.backend.get(&self.keys.index(correlation_key)).await? {
            Some(id) => self.get(&JobId::from(id)).await,
            None => Ok(None),
        }
    }

    /// Merge a patch into the stored record and refresh `updated_at`.
    pub async fn update(&self, id: &JobId, patch: &JobPatch) -> QueueResult<Job> {
        let mut job = self.require(id).await?;
        job.apply(patch)?;
        self.write(&job).await?;
        Ok(job)
    }

    /// Move a queued job to processing and count the attempt.
    pub async fn claim(&self, id: &JobId) -> QueueResult<Job> {
        let mut job = self.require(id).await?;
        job.claim()?;
        self.write(&job).await?;
        Ok(job)
    }

    async fn write(&self, job: &Job) -> QueueResult<()> {
        let ttl = if job.is_terminal() {
            self.terminal_ttl
        } else {
            self.record_ttl
        };
        let raw = serde_json::to_string(job)?;
        self.backend.set(&self.keys.job(&job.id), &raw, Some(ttl)).await
    }
}
