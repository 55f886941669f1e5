//! In-process backend for tests and single-process deployments.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::KvBackend;
use crate::error::{QueueError, QueueResult};

#[derive(Debug, Default)]
struct MemoryState {
    values: HashMap<String, (String, Option<Instant>)>,
    lists: HashMap<String, VecDeque<String>>,
}

/// Shared in-memory state with Redis-compatible semantics.
///
/// Clones share the same state. Expiry is measured on the tokio clock, so
/// paused-time tests can fast-forward past TTLs.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> QueueResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| QueueError::backend("memory backend lock poisoned"))
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> QueueResult<Option<String>> {
        let mut state = self.lock()?;
        let expired = match state.values.get(key) {
            Some((_, Some(deadline))) => Instant::now() >= *deadline,
            Some((_, None)) => false,
            None => return Ok(None),
        };
        if expired {
            state.values.remove(key);
            return Ok(None);
        }
        Ok(state.values.get(key).map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> QueueResult<()> {
        let deadline = ttl.map(|ttl| Instant::now() + ttl);
        self.lock()?
            .values
            .insert(key.to_string(), (value.to_string(), deadline));
        Ok(())
    }

    async fn del(&self, key: &str) -> QueueResult<()> {
        let mut state = self.lock()?;
        state.values.remove(key);
        state.lists.remove(key);
        Ok(())
    }

    async fn lpush(&self, list: &str, value: &str) -> QueueResult<()> {
        self.lock()?
            .lists
            .entry(list.to_string())
            .or_default()
            .push_front(value.to_string());
        Ok(())
    }

    async fn rpoplpush(&self, source: &str, destination: &str) -> QueueResult<Option<String>> {
        let mut state = self.lock()?;
        let Some(value) = state.lists.get_mut(source).and_then(|l| l.pop_back()) else {
            return Ok(None);
        };
        state
            .lists
            .entry(destination.to_string())
            .or_default()
            .push_front(value.clone());
        Ok(Some(value))
    }

    async fn lrem(&self, list: &str, count: isize, value: &str) -> QueueResult<usize> {
        let mut state = self.lock()?;
        let Some(items) = state.lists.get_mut(list) else {
            return Ok(0);
        };

        let limit = if count == 0 { usize::MAX } else { count.unsigned_abs() };
        let mut removed = 0;

        if count >= 0 {
            let mut i = 0;
            while i < items.len() && removed < limit {
                if items[i] == value {
                    items.remove(i);
                    removed += 1;
                } else {
                    i += 1;
                }
            }
        } else {
            let mut i = items.len();
            while i > 0 && removed < limit {
                i -= 1;
                if items[i] == value {
                    items.remove(i);
                    removed += 1;
                }
            }
        }

        Ok(removed)
    }

    async fn lrange(&self, list: &str) -> QueueResult<Vec<String>> {
        Ok(self
            .lock()?
            .lists
            .get(list)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn llen(&self, list: &str) -> QueueResult<u64> {
        Ok(self.lock()?.lists.get(list).map(|l| l.len() as u64).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_values_expire() {
        let backend = MemoryBackend::new();
        backend.set("k", "v", Some(Duration::from_secs(10))).await.unwrap();
        backend.set("forever", "v", None).await.unwrap();

        assert_eq!(backend.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(backend.get("k").await.unwrap(), None);
        assert_eq!(backend.get("forever").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_rpoplpush_is_fifo() {
        let backend = MemoryBackend::new();
        backend.lpush("pending", "a").await.unwrap();
        backend.lpush("pending", "b").await.unwrap();

        assert_eq!(
            backend.rpoplpush("pending", "flight").await.unwrap().as_deref(),
            Some("a")
        );
        assert_eq!(backend.lrange("flight").await.unwrap(), vec!["a"]);
        assert_eq!(backend.llen("pending").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lrem_count_semantics() {
        let backend = MemoryBackend::new();
        for v in ["x", "y", "x", "x"] {
            backend.lpush("l", v).await.unwrap();
        }
        // head -> tail: x x y x
        assert_eq!(backend.lrem("l", 1, "x").await.unwrap(), 1);
        assert_eq!(backend.lrange("l").await.unwrap(), vec!["x", "y", "x"]);

        assert_eq!(backend.lrem("l", -1, "x").await.unwrap(), 1);
        assert_eq!(backend.lrange("l").await.unwrap(), vec!["x", "y"]);

        assert_eq!(backend.lrem("l", 0, "x").await.unwrap(), 1);
        assert_eq!(backend.lrange("l").await.unwrap(), vec!["y"]);
        assert_eq!(backend.lrem("missing", 0, "x").await.unwrap(), 0);
    }
}
