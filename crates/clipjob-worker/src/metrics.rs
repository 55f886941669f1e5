//! Worker metrics.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! binary installs a recorder.

use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Metric name constants for consistency.
pub mod names {
    // Job lifecycle
    pub const JOBS_ENQUEUED_TOTAL: &str = "clipjob_jobs_enqueued_total";
    pub const JOBS_STARTED_TOTAL: &str = "clipjob_jobs_started_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "clipjob_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "clipjob_jobs_failed_total";
    pub const JOBS_RETRIED_TOTAL: &str = "clipjob_jobs_retried_total";
    pub const JOBS_IN_PROGRESS: &str = "clipjob_jobs_in_progress";

    // Polling
    pub const POLL_ERRORS_TOTAL: &str = "clipjob_poll_errors_total";
    pub const POLL_RATE_LIMITED_TOTAL: &str = "clipjob_poll_rate_limited_total";
    pub const POLL_DURATION_SECONDS: &str = "clipjob_poll_duration_seconds";

    // Recovery
    pub const SWEEP_RECLAIMED_TOTAL: &str = "clipjob_sweep_reclaimed_total";
    pub const SWEEP_RETURNED_TOTAL: &str = "clipjob_sweep_returned_total";
    pub const SWEEP_ORPHANED_TOTAL: &str = "clipjob_sweep_orphaned_total";
    pub const WRITE_RETRIES_TOTAL: &str = "clipjob_write_retries_total";
}

/// Install the Prometheus exporter with its own HTTP listener.
pub fn install_prometheus(port: u16) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
}

pub fn record_enqueued(provider: &str) {
    counter!(names::JOBS_ENQUEUED_TOTAL, "provider" => provider.to_string()).increment(1);
}

pub fn record_started(provider: &str) {
    counter!(names::JOBS_STARTED_TOTAL, "provider" => provider.to_string()).increment(1);
}

pub fn record_completed(provider: &str, poll_duration: Duration) {
    counter!(names::JOBS_COMPLETED_TOTAL, "provider" => provider.to_string()).increment(1);
    histogram!(names::POLL_DURATION_SECONDS, "provider" => provider.to_string())
        .record(poll_duration.as_secs_f64());
}

/// `kind` is `business`, `infrastructure` or `config`.
pub fn record_failed(provider: &str, kind: &'static str, terminal: bool) {
    counter!(
        names::JOBS_FAILED_TOTAL,
        "provider" => provider.to_string(),
        "kind" => kind,
        "terminal" => if terminal { "true" } else { "false" }
    )
    .increment(1);
}

pub fn record_retried(provider: &str) {
    counter!(names::JOBS_RETRIED_TOTAL, "provider" => provider.to_string()).increment(1);
}

pub fn set_in_progress(count: usize) {
    gauge!(names::JOBS_IN_PROGRESS).set(count as f64);
}

pub fn record_poll_error(provider: &str, rate_limited: bool) {
    counter!(names::POLL_ERRORS_TOTAL, "provider" => provider.to_string()).increment(1);
    if rate_limited {
        counter!(names::POLL_RATE_LIMITED_TOTAL, "provider" => provider.to_string()).increment(1);
    }
}

pub fn record_sweep(reclaimed: usize, returned: usize, orphaned: usize) {
    counter!(names::SWEEP_RECLAIMED_TOTAL).increment(reclaimed as u64);
    counter!(names::SWEEP_RETURNED_TOTAL).increment(returned as u64);
    counter!(names::SWEEP_ORPHANED_TOTAL).increment(orphaned as u64);
}

pub fn record_write_retry(operation: &str) {
    counter!(names::WRITE_RETRIES_TOTAL, "operation" => operation.to_string()).increment(1);
}
