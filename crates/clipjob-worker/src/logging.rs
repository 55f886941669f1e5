//! Structured job logging.

use clipjob_models::Job;
use tracing::{error, info, warn, Span};

/// Logs job lifecycle events with the job's identity attached.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    provider: String,
    attempt: u32,
    max_attempts: u32,
}

impl JobLogger {
    pub fn new(job: &Job) -> Self {
        Self {
            job_id: job.id.to_string(),
            provider: job.provider.clone(),
            attempt: job.attempts,
            max_attempts: job.max_attempts,
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            provider = %self.provider,
            attempt = self.attempt,
            max_attempts = self.max_attempts,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            provider = %self.provider,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            provider = %self.provider,
            attempt = self.attempt,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            provider = %self.provider,
            attempt = self.attempt,
            max_attempts = self.max_attempts,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            provider = %self.provider,
            attempt = self.attempt,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Span covering one attempt; entered around the runner's future.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            provider = %self.provider,
            attempt = self.attempt
        )
    }
}
