//! Job orchestration worker.
//!
//! This crate provides:
//! - The poll-until-complete loop for external tasks
//! - A runner that settles each job in the store and the queue
//! - A bounded-concurrency executor with graceful shutdown
//! - The stale job sweeper
//! - An enqueue facade for producers

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod poller;
pub mod retry;
pub mod runner;
pub mod service;
pub mod sweeper;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use poller::{PollError, PollOutcome, Poller};
pub use runner::{FailureKind, JobRunner, RunOutcome, CANCELLED_JOB_ERROR};
pub use service::JobService;
pub use sweeper::StaleJobSweeper;
