//! FIFO job queue with an in-flight list for stale-job recovery.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clipjob_models::{Job, JobId, JobPatch, JobStatus, TransitionError};
use tracing::{debug, info, warn};

use crate::backend::KvBackend;
use crate::config::{KeySpace, QueueConfig};
use crate::error::QueueResult;
use crate::store::JobStore;

/// Error recorded on jobs reclaimed by [`JobQueue::sweep_stale`].
pub const STALE_JOB_ERROR: &str =
    "Processing timed out. The worker may have crashed. Please try again.";

/// Floor for how long an unclaimed sighting is remembered between sweeps.
const MIN_UNCLAIMED_MARK_TTL: Duration = Duration::from_secs(3600);

/// Outcome of one stale sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Jobs forced to failed
    pub reclaimed: Vec<JobId>,
    /// Reclaimed jobs that had budget left and went back to pending
    pub requeued: Vec<JobId>,
    /// Popped jobs that were never claimed, returned to pending untouched
    pub returned: Vec<JobId>,
    /// In-flight entries whose record no longer exists
    pub orphaned: Vec<JobId>,
    /// In-flight entries that had already settled and were just released
    pub released: Vec<JobId>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.reclaimed.is_empty()
            && self.returned.is_empty()
            && self.orphaned.is_empty()
            && self.released.is_empty()
    }
}

/// Job queue client.
///
/// Producers push at the head of the pending list and consumers pop from
/// the tail, so each producer's pushes come out in order. A pop moves the
/// ID into the in-flight list in the same command.
#[derive(Clone)]
pub struct JobQueue {
    backend: Arc<dyn KvBackend>,
    keys: KeySpace,
    pending_key: String,
    in_flight_key: String,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(backend: Arc<dyn KvBackend>, config: &QueueConfig) -> Self {
        let keys = config.keys();
        Self {
            backend,
            pending_key: keys.pending(),
            in_flight_key: keys.in_flight(),
            keys,
        }
    }

    /// Append a job ID to the pending list.
    pub async fn push(&self, id: &JobId) -> QueueResult<()> {
        self.backend.lpush(&self.pending_key, id.as_str()).await?;
        debug!(job_id = %id, "Pushed job");
        Ok(())
    }

    /// Take the oldest pending ID and record it as in flight.
    pub async fn pop(&self) -> QueueResult<Option<JobId>> {
        let id = self
            .backend
            .rpoplpush(&self.pending_key, &self.in_flight_key)
            .await?;
        Ok(id.map(JobId::from))
    }

    /// Release an in-flight ID once its job has settled.
    pub async fn mark_done(&self, id: &JobId) -> QueueResult<()> {
        let removed = self.backend.lrem(&self.in_flight_key, 1, id.as_str()).await?;
        if removed == 0 {
            debug!(job_id = %id, "mark_done: job was not in flight");
        }
        Ok(())
    }

    /// Release an in-flight ID and push it back to the pending list.
    pub async fn requeue(&self, id: &JobId) -> QueueResult<()> {
        self.backend.lrem(&self.in_flight_key, 1, id.as_str()).await?;
        self.push(id).await
    }

    /// Record a failure on a processing job and settle it in the queue.
    ///
    /// With `retry` set and attempts left the record goes back to `queued`
    /// and the ID to the end of the pending list. Otherwise the ID is
    /// released from in-flight and the job stays `failed`. A record already
    /// failed with the same error is not rewritten, so a caller can repeat
    /// the call after a partial failure. Returns the settled record.
    pub async fn fail(&self, store: &JobStore, id: &JobId, error: &str, retry: bool) -> QueueResult<Job> {
        let current = store.require(id).await?;
        let failed = match current.status {
            JobStatus::Failed if current.error.as_deref() == Some(error) => current,
            JobStatus::Processing => store.update(id, &JobPatch::failed(error)).await?,
            from => {
                return Err(TransitionError::InvalidTransition {
                    job_id: id.to_string(),
                    from,
                    to: JobStatus::Failed,
                }
                .into())
            }
        };

        if retry && failed.has_attempts_left() {
            let queued = store.update(id, &JobPatch::requeued()).await?;
            self.requeue(id).await?;
            Ok(queued)
        } else {
            self.mark_done(id).await?;
            Ok(failed)
        }
    }

    /// Pending list length.
    pub async fn len(&self) -> QueueResult<u64> {
        self.backend.llen(&self.pending_key).await
    }

    /// True if nothing is pending.
    pub async fn is_empty(&self) -> QueueResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// IDs currently claimed by workers.
    pub async fn in_flight(&self) -> QueueResult<Vec<JobId>> {
        let ids = self.backend.lrange(&self.in_flight_key).await?;
        Ok(ids.into_iter().map(JobId::from).collect())
    }

    /// Reclaim in-flight jobs whose record has not changed for `max_age`.
    ///
    /// Stale processing jobs are failed with [`STALE_JOB_ERROR`] through
    /// [`fail`](Self::fail), so a job with attempts left goes back to
    /// pending. A `queued` record in flight was popped but not yet claimed;
    /// its age counts from the first sweep that saw it, and once that passes
    /// `max_age` it is returned to pending without spending an attempt.
    /// Entries whose record expired or was never written, and entries
    /// already completed or failed, are dropped from the in-flight list. A
    /// record that cannot be updated stays in flight for the next sweep.
    pub async fn sweep_stale(&self, store: &JobStore, max_age: Duration) -> QueueResult<SweepReport> {
        let now = Utc::now();
        let mut report = SweepReport::default();

        for id in self.in_flight().await? {
            let Some(job) = store.get(&id).await? else {
                warn!(job_id = %id, "In-flight job has no record, dropping");
                self.mark_done(&id).await?;
                report.orphaned.push(id);
                continue;
            };

            match job.status {
                JobStatus::Completed | JobStatus::Failed => {
                    self.mark_done(&id).await?;
                    report.released.push(id);
                    continue;
                }
                JobStatus::Queued => {
                    if self.unclaimed_for(&job, now, max_age).await? {
                        warn!(job_id = %id, "Popped job was never claimed, returning to queue");
                        self.requeue(&id).await?;
                        self.backend.del(&self.keys.unclaimed(&id)).await?;
                        report.returned.push(id);
                    }
                    continue;
                }
                JobStatus::Processing => {}
            }

            if job.idle_for(now) < to_chrono(max_age) {
                continue;
            }

            warn!(
                job_id = %id,
                status = %job.status,
                attempts = job.attempts,
                updated_at = %job.updated_at,
                "Detected stale job"
            );

            match self.fail(store, &id, STALE_JOB_ERROR, true).await {
                Ok(settled) => {
                    if settled.status == JobStatus::Queued {
                        report.requeued.push(id.clone());
                    }
                    report.reclaimed.push(id);
                }
                Err(e) => {
                    warn!(job_id = %id, "Failed to reclaim stale job: {}", e);
                }
            }
        }

        if !report.is_empty() {
            info!(
                reclaimed = report.reclaimed.len(),
                requeued = report.requeued.len(),
                returned = report.returned.len(),
                orphaned = report.orphaned.len(),
                released = report.released.len(),
                "Stale sweep complete"
            );
        }

        Ok(report)
    }

    /// True once a queued in-flight record has been unclaimed for `max_age`.
    ///
    /// The first sighting is stamped and never counts as stale: `updated_at`
    /// of a popped record is its enqueue time, not its pop time. A stamp
    /// older than the record belongs to an earlier pass through the queue.
    async fn unclaimed_for(&self, job: &Job, now: DateTime<Utc>, max_age: Duration) -> QueueResult<bool> {
        let key = self.keys.unclaimed(&job.id);
        let seen_at = self
            .backend
            .get(&key)
            .await?
            .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
            .map(|t| t.with_timezone(&Utc))
            .filter(|t| *t >= job.updated_at);

        match seen_at {
            Some(seen_at) => Ok(now - seen_at >= to_chrono(max_age)),
            None => {
                let ttl = max_age.saturating_mul(2).max(MIN_UNCLAIMED_MARK_TTL);
                self.backend.set(&key, &now.to_rfc3339(), Some(ttl)).await?;
                Ok(false)
            }
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
