//! Redis backend.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::info;

use super::KvBackend;
use crate::error::{QueueError, QueueResult};

/// Redis (or Valkey/Upstash) backend over a multiplexed async connection.
#[derive(Clone)]
pub struct RedisBackend {
    conn: MultiplexedConnection,
}

impl RedisBackend {
    /// Connect to Redis.
    pub async fn connect(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;

        info!("Connected to Redis backend");
        Ok(Self { conn })
    }

    /// Round-trip check used by health probes.
    pub async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl KvBackend for RedisBackend {
    async fn get(&self, key: &str) -> QueueResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        match ttl {
            // Redis rejects EX 0
            Some(ttl) => conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1)).await?,
            None => conn.set::<_, _, ()>(key, value).await?,
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn lpush(&self, list: &str, value: &str) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(list, value).await?;
        Ok(())
    }

    async fn rpoplpush(&self, source: &str, destination: &str) -> QueueResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.rpoplpush(source, destination).await?;
        Ok(value)
    }

    async fn lrem(&self, list: &str, count: isize, value: &str) -> QueueResult<usize> {
        let mut conn = self.conn.clone();
        let removed: usize = conn.lrem(list, count, value).await?;
        Ok(removed)
    }

    async fn lrange(&self, list: &str) -> QueueResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let values: Vec<String> = conn.lrange(list, 0, -1).await?;
        Ok(values)
    }

    async fn llen(&self, list: &str) -> QueueResult<u64> {
        let mut conn = self.conn.clone();
        let len: u64 = conn.llen(list).await?;
        Ok(len)
    }
}
