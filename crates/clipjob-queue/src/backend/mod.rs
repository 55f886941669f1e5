//! Key-value backends.
//!
//! The store and queue only rely on single-key atomicity: one `SET`/`GET`
//! per record and one list command per push/pop. No multi-key transactions
//! are assumed.

mod memory;
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::QueueResult;

pub use self::memory::MemoryBackend;
pub use self::redis_store::RedisBackend;

/// Minimal Redis-shaped key-value interface.
///
/// Lists follow Redis orientation: `lpush` adds at the head, pops take
/// from the tail, `lrange` returns head to tail.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Read a string value. Expired keys read as `None`.
    async fn get(&self, key: &str) -> QueueResult<Option<String>>;

    /// Overwrite a string value, optionally with a TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> QueueResult<()>;

    /// Delete a key.
    async fn del(&self, key: &str) -> QueueResult<()>;

    /// Push a value at the head of a list.
    async fn lpush(&self, list: &str, value: &str) -> QueueResult<()>;

    /// Atomically pop the tail of `source` and push it at the head of `destination`.
    async fn rpoplpush(&self, source: &str, destination: &str) -> QueueResult<Option<String>>;

    /// Remove occurrences of `value` (Redis `LREM` count semantics). Returns how many were removed.
    async fn lrem(&self, list: &str, count: isize, value: &str) -> QueueResult<usize>;

    /// Every element of a list, head to tail.
    async fn lrange(&self, list: &str) -> QueueResult<Vec<String>>;

    /// List length.
    async fn llen(&self, list: &str) -> QueueResult<u64>;
}
