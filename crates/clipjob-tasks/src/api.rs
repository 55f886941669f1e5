//! The external task contract and per-provider polling policy.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clipjob_models::{TaskHandle, TaskStatus};

use crate::error::TaskApiResult;

/// Polling policy for one integration.
///
/// Intervals are fixed per integration rather than an exponential curve;
/// rate-limit responses get their own, longer wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    /// Wait between status checks
    pub poll_interval: Duration,
    /// Wait after a rate-limit response without `Retry-After`
    pub rate_limit_wait: Duration,
    /// Consecutive failed status checks tolerated before giving up
    pub max_consecutive_errors: u32,
    /// Wall-clock budget for one polling session
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::task_status()
    }
}

impl PollPolicy {
    /// Long-running generation tasks.
    pub fn task_status() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            rate_limit_wait: Duration::from_secs(60),
            max_consecutive_errors: 5,
            timeout: Duration::from_secs(30 * 60),
        }
    }

    /// Exports finish faster and are polled more often.
    pub fn export_status() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            ..Self::task_status()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// An external service that runs long tasks and reports their status.
///
/// `task_status` must be idempotent: it is called repeatedly and an
/// unchanged answer between calls is normal.
#[async_trait]
pub trait TaskApi: Send + Sync {
    /// Provider name stored on jobs (e.g. `"klap"`).
    fn name(&self) -> &str;

    /// How this provider should be polled.
    fn poll_policy(&self) -> PollPolicy {
        PollPolicy::default()
    }

    /// Start a task for the given job payload.
    async fn create_task(&self, payload: &serde_json::Value) -> TaskApiResult<TaskHandle>;

    /// Fetch the current status of a task.
    async fn task_status(&self, task_id: &str) -> TaskApiResult<TaskStatus>;
}

/// Provider name to adapter lookup.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    apis: HashMap<String, Arc<dyn TaskApi>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own name, replacing any previous one.
    pub fn register(&mut self, api: Arc<dyn TaskApi>) {
        self.apis.insert(api.name().to_string(), api);
    }

    pub fn with(mut self, api: Arc<dyn TaskApi>) -> Self {
        self.register(api);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskApi>> {
        self.apis.get(name).cloned()
    }

    pub fn providers(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.apis.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.apis.is_empty()
    }
}
