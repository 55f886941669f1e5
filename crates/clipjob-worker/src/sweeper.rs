//! Background recovery of jobs abandoned mid-processing.
//!
//! A worker that dies between pop and settle leaves its job in the in-flight
//! list with a `processing` record that stops changing. Runners heartbeat the
//! record on every poll, so anything idle past `stale_after` has no live owner
//! and is failed by [`JobQueue::sweep_stale`], going back to the queue when
//! it has attempts left.

use std::time::Duration;

use clipjob_queue::{JobQueue, JobStore, QueueResult, SweepReport};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::WorkerConfig;
use crate::metrics;
use crate::retry::FailureTracker;

/// `tokio::time::interval` rejects a zero period.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Stale job sweeper service.
pub struct StaleJobSweeper {
    store: JobStore,
    queue: JobQueue,
    interval: Duration,
    stale_after: Duration,
    enabled: bool,
}

impl StaleJobSweeper {
    pub fn new(store: JobStore, queue: JobQueue, config: &WorkerConfig) -> Self {
        Self {
            store,
            queue,
            interval: config.sweep_interval.max(MIN_SWEEP_INTERVAL),
            stale_after: config.stale_after,
            enabled: config.sweep_enabled,
        }
    }

    /// Sweep every interval until `cancel` fires.
    ///
    /// Meant to be spawned as a background task.
    pub async fn run(&self, cancel: CancellationToken) {
        if !self.enabled {
            info!("Stale job sweep is disabled");
            return;
        }

        info!(
            "Starting stale job sweeper (interval: {:?}, stale after: {:?})",
            self.interval, self.stale_after
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = FailureTracker::new(3);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.sweep_once().await {
                Ok(_) => failures.record_success(),
                Err(e) => {
                    if failures.record_failure() {
                        error!("Stale job sweep error: {}", e);
                    }
                }
            }
        }

        info!("Stale job sweeper stopped");
    }

    /// Run a single sweep (also used by tests and manual invocation).
    pub async fn sweep_once(&self) -> QueueResult<SweepReport> {
        let report = self.queue.sweep_stale(&self.store, self.stale_after).await?;
        metrics::record_sweep(
            report.reclaimed.len(),
            report.returned.len(),
            report.orphaned.len(),
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipjob_models::JobStatus;
    use clipjob_queue::{KvBackend, MemoryBackend, QueueConfig, STALE_JOB_ERROR};
    use std::sync::Arc;

    fn sweeper(stale_after: Duration) -> StaleJobSweeper {
        let backend: Arc<dyn KvBackend> = Arc::new(MemoryBackend::new());
        let config = QueueConfig::default();
        let worker = WorkerConfig {
            stale_after,
            ..Default::default()
        };
        StaleJobSweeper::new(
            JobStore::new(Arc::clone(&backend), &config),
            JobQueue::new(backend, &config),
            &worker,
        )
    }

    #[tokio::test]
    async fn test_sweep_once_reclaims_abandoned_job() {
        let sweeper = sweeper(Duration::ZERO);
        let job = sweeper.store.create("k", "klap", serde_json::json!({})).await.unwrap();
        sweeper.queue.push(&job.id).await.unwrap();
        let id = sweeper.queue.pop().await.unwrap().unwrap();
        sweeper.store.claim(&id).await.unwrap();

        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.reclaimed, vec![job.id.clone()]);
        assert_eq!(report.requeued, vec![job.id.clone()]);

        let stored = sweeper.store.require(&job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Queued);
        assert_eq!(stored.attempts, 1);
        assert!(sweeper.queue.in_flight().await.unwrap().is_empty());
        assert_eq!(sweeper.queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sweep_once_fails_exhausted_job() {
        let sweeper = sweeper(Duration::ZERO);
        let job = sweeper
            .store
            .create_with_max_attempts("k", "klap", serde_json::json!({}), 1)
            .await
            .unwrap();
        sweeper.queue.push(&job.id).await.unwrap();
        let id = sweeper.queue.pop().await.unwrap().unwrap();
        sweeper.store.claim(&id).await.unwrap();

        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.reclaimed, vec![job.id.clone()]);
        assert!(report.requeued.is_empty());

        let stored = sweeper.store.require(&job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some(STALE_JOB_ERROR));
        assert!(sweeper.queue.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_fresh_job_is_left_alone() {
        let sweeper = sweeper(Duration::from_secs(600));
        let job = sweeper.store.create("k", "klap", serde_json::json!({})).await.unwrap();
        sweeper.queue.push(&job.id).await.unwrap();
        let id = sweeper.queue.pop().await.unwrap().unwrap();
        sweeper.store.claim(&id).await.unwrap();

        assert!(sweeper.sweep_once().await.unwrap().is_empty());
        assert_eq!(sweeper.queue.in_flight().await.unwrap(), vec![job.id]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_clamped() {
        let backend: Arc<dyn KvBackend> = Arc::new(MemoryBackend::new());
        let config = QueueConfig::default();
        let sweeper = StaleJobSweeper::new(
            JobStore::new(Arc::clone(&backend), &config),
            JobQueue::new(backend, &config),
            &WorkerConfig {
                sweep_interval: Duration::ZERO,
                ..Default::default()
            },
        );
        assert_eq!(sweeper.interval, MIN_SWEEP_INTERVAL);

        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { sweeper.run(cancel).await })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exits_on_cancel() {
        let sweeper = sweeper(Duration::from_secs(600));
        let cancel = CancellationToken::new();
        cancel.cancel();
        sweeper.run(cancel).await;
    }
}
