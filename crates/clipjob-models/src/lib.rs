//! Shared data models for clipjob.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, their status and partial updates
//! - External task status snapshots reported by clip-generation providers

pub mod job;
pub mod task;

// Re-export common types
pub use job::{Job, JobId, JobPatch, JobStatus, TransitionError, DEFAULT_MAX_ATTEMPTS};
pub use task::{TaskHandle, TaskState, TaskStatus};
