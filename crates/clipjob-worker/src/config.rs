//! Worker configuration.

use std::time::Duration;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,
    /// Wait before polling an empty queue again
    pub idle_backoff: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// How often the stale sweep runs
    pub sweep_interval: Duration,
    /// In-flight jobs untouched for this long are reclaimed as failed
    pub stale_after: Duration,
    /// Whether this process runs the stale sweeper at all
    pub sweep_enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            idle_backoff: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(600), // 10 minutes, well above the poll intervals
            sweep_enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: std::env::var("WORKER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            idle_backoff: Duration::from_millis(
                std::env::var("WORKER_IDLE_BACKOFF_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1000),
            ),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            sweep_interval: positive_secs(std::env::var("WORKER_SWEEP_INTERVAL_SECS").ok(), 60),
            stale_after: Duration::from_secs(
                std::env::var("WORKER_STALE_AFTER_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
            sweep_enabled: std::env::var("ENABLE_STALE_SWEEP")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
        }
    }
}

/// Seconds from an env value; zero and garbage fall back to `default`.
fn positive_secs(value: Option<String>, default: u64) -> Duration {
    let secs = value
        .and_then(|s| s.parse().ok())
        .filter(|n: &u64| *n > 0)
        .unwrap_or(default);
    Duration::from_secs(secs)
}
