//! Store and queue configuration.

use std::time::Duration;

use clipjob_models::{JobId, DEFAULT_MAX_ATTEMPTS};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Prefix for every key written by the store and queue
    pub key_prefix: String,
    /// Dequeue budget given to new jobs
    pub max_attempts: u32,
    /// TTL for records that may still change
    pub record_ttl: Duration,
    /// TTL for records in a terminal state
    pub terminal_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "clipjob".to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            record_ttl: Duration::from_secs(86400),   // 24 hours
            terminal_ttl: Duration::from_secs(86400), // 24 hours
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("QUEUE_KEY_PREFIX").unwrap_or_else(|_| "clipjob".to_string()),
            max_attempts: std::env::var("QUEUE_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &u32| *n > 0)
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
            record_ttl: Duration::from_secs(
                std::env::var("QUEUE_RECORD_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(86400),
            ),
            terminal_ttl: Duration::from_secs(
                std::env::var("QUEUE_TERMINAL_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(86400),
            ),
        }
    }

    pub fn keys(&self) -> KeySpace {
        KeySpace::new(&self.key_prefix)
    }
}

/// Key layout shared by the store and the queue.
#[derive(Debug, Clone)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn job(&self, id: &JobId) -> String {
        format!("{}:job:{}", self.prefix, id)
    }

    pub fn index(&self, correlation_key: &str) -> String {
        format!("{}:job-index:{}", self.prefix, correlation_key)
    }

    pub fn pending(&self) -> String {
        format!("{}:queue:pending", self.prefix)
    }

    pub fn in_flight(&self) -> String {
        format!("{}:queue:in-flight", self.prefix)
    }

    /// When the sweep first saw a popped job that was still unclaimed.
    pub fn unclaimed(&self, id: &JobId) -> String {
        format!("{}:queue:unclaimed:{}", self.prefix, id)
    }
}
