//! Job records tracked by the job store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Default number of dequeues a job may consume before failing permanently.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Job processing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is queued waiting for a worker
    #[default]
    Queued,
    /// Job is claimed by a worker and its external task is being polled
    Processing,
    /// Job completed successfully
    Completed,
    /// Job failed (terminal only once the attempt budget is spent)
    Failed,
}

impl JobStatus {
    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected job mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job {job_id} is terminal ({status}) and cannot be modified")]
    Terminal { job_id: String, status: JobStatus },

    #[error("Job {job_id} has used all {attempts} attempts")]
    AttemptsExhausted { job_id: String, attempts: u32 },

    #[error("Invalid patch for job {job_id}: {reason}")]
    InvalidPatch { job_id: String, reason: String },
}

/// Partial update merged into a stored job.
///
/// `attempts` is deliberately absent: it only moves through [`Job::claim`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_task_id: Option<String>,
}

impl JobPatch {
    /// Patch that completes the job with a result.
    pub fn completed(result: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            result: Some(result.into()),
            ..Default::default()
        }
    }

    /// Patch that fails the job with an error.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Patch that returns the job to the pending state.
    pub fn requeued() -> Self {
        Self {
            status: Some(JobStatus::Queued),
            ..Default::default()
        }
    }

    /// Patch that only reports progress.
    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    /// Patch that records the provider task ID.
    pub fn external_task(task_id: impl Into<String>) -> Self {
        Self {
            external_task_id: Some(task_id.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.progress.is_none()
            && self.result.is_none()
            && self.error.is_none()
            && self.external_task_id.is_none()
    }
}

/// One unit of delegated external asynchronous work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID, fixed at creation
    pub id: JobId,

    /// External entity this job belongs to (e.g. a project ID)
    pub correlation_key: String,

    /// Name of the task provider that executes this job
    pub provider: String,

    /// Current status
    #[serde(default)]
    pub status: JobStatus,

    /// Progress (0-100)
    #[serde(default)]
    pub progress: u8,

    /// Opaque input handed to the provider
    pub payload: serde_json::Value,

    /// Output reference, only present when completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    /// Failure reason, only present when failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Provider task currently backing this job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_task_id: Option<String>,

    /// Number of times the job has been dequeued
    #[serde(default)]
    pub attempts: u32,

    /// Dequeue budget
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,

    /// Start of the most recent attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// When the job last reached completed or failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl Job {
    /// Create a new queued job.
    pub fn new(
        correlation_key: impl Into<String>,
        provider: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();

        Self {
            id: JobId::new(),
            correlation_key: correlation_key.into(),
            provider: provider.into(),
            status: JobStatus::Queued,
            progress: 0,
            payload,
            result: None,
            error: None,
            external_task_id: None,
            attempts: 0,
            max_attempts: default_max_attempts(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Set the dequeue budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// True if the job can be dequeued again after a failure.
    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Check if this is a terminal state (no more transitions expected).
    pub fn is_terminal(&self) -> bool {
        match self.status {
            JobStatus::Completed => true,
            JobStatus::Failed => !self.has_attempts_left(),
            JobStatus::Queued | JobStatus::Processing => false,
        }
    }

    /// Age of the last mutation.
    pub fn idle_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.updated_at
    }

    fn can_transition(&self, to: JobStatus) -> bool {
        match (self.status, to) {
            // Entering processing goes through claim() so attempts stays in step
            (JobStatus::Processing, JobStatus::Processing) => true,
            (JobStatus::Queued, JobStatus::Failed) => true,
            (JobStatus::Processing, JobStatus::Completed)
            | (JobStatus::Processing, JobStatus::Failed)
            | (JobStatus::Processing, JobStatus::Queued) => true,
            (JobStatus::Failed, JobStatus::Queued) => self.has_attempts_left(),
            _ => false,
        }
    }

    /// Claim the job for a new attempt (dequeue).
    ///
    /// This is the only place `attempts` grows.
    pub fn claim(&mut self) -> Result<(), TransitionError> {
        if self.status != JobStatus::Queued {
            return Err(TransitionError::InvalidTransition {
                job_id: self.id.to_string(),
                from: self.status,
                to: JobStatus::Processing,
            });
        }
        if !self.has_attempts_left() {
            return Err(TransitionError::AttemptsExhausted {
                job_id: self.id.to_string(),
                attempts: self.attempts,
            });
        }

        let now = Utc::now();
        self.status = JobStatus::Processing;
        self.attempts += 1;
        self.progress = 0;
        self.external_task_id = None;
        self.started_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Merge a patch into the job.
    ///
    /// On error the job is left untouched.
    pub fn apply(&mut self, patch: &JobPatch) -> Result<(), TransitionError> {
        if patch.is_empty() {
            return Ok(());
        }
        if self.is_terminal() {
            return Err(TransitionError::Terminal {
                job_id: self.id.to_string(),
                status: self.status,
            });
        }

        let target = patch.status.unwrap_or(self.status);
        if !self.can_transition(target) {
            return Err(TransitionError::InvalidTransition {
                job_id: self.id.to_string(),
                from: self.status,
                to: target,
            });
        }
        if patch.result.is_some() && target != JobStatus::Completed {
            return Err(self.invalid_patch("result can only be set when completing"));
        }
        if patch.error.is_some() && target != JobStatus::Failed {
            return Err(self.invalid_patch("error can only be set when failing"));
        }

        let now = Utc::now();
        let mut next = self.clone();
        next.status = target;

        if let Some(task_id) = &patch.external_task_id {
            next.external_task_id = Some(task_id.clone());
        }

        if let Some(progress) = patch.progress {
            let progress = progress.min(100);
            next.progress = if self.status == JobStatus::Processing {
                self.progress.max(progress)
            } else {
                progress
            };
        }

        match target {
            JobStatus::Completed => {
                next.result = patch.result.clone();
                if next.result.is_none() {
                    return Err(self.invalid_patch("completed job requires a result"));
                }
                next.error = None;
                next.progress = 100;
                next.completed_at = Some(now);
            }
            JobStatus::Failed => {
                next.error = patch.error.clone();
                if next.error.is_none() {
                    return Err(self.invalid_patch("failed job requires an error"));
                }
                next.result = None;
                next.completed_at = Some(now);
            }
            JobStatus::Queued => {
                next.result = None;
                next.error = None;
                next.progress = 0;
            }
            JobStatus::Processing => {}
        }

        next.updated_at = now;
        *self = next;
        Ok(())
    }

    fn invalid_patch(&self, reason: &str) -> TransitionError {
        TransitionError::InvalidPatch {
            job_id: self.id.to_string(),
            reason: reason.to_string(),
        }
    }
}
