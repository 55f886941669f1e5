//! Job store and job queue over a key-value backend.
//!
//! This crate provides:
//! - A key-value backend abstraction with Redis and in-memory implementations
//! - Durable job records with a correlation-key index and TTLs
//! - A FIFO pending list plus an in-flight list for stale-job recovery

pub mod backend;
pub mod config;
pub mod error;
pub mod queue;
pub mod store;

pub use backend::{KvBackend, MemoryBackend, RedisBackend};
pub use config::{KeySpace, QueueConfig};
pub use error::{QueueError, QueueResult};
pub use queue::{JobQueue, SweepReport, STALE_JOB_ERROR};
pub use store::JobStore;
