//! Redis integration tests.

use std::sync::Arc;
use std::time::Duration;

use clipjob_models::{JobPatch, JobStatus};
use clipjob_queue::{JobQueue, JobStore, KvBackend, QueueConfig, RedisBackend};

async fn setup() -> (JobStore, JobQueue) {
    dotenvy::dotenv().ok();

    let config = QueueConfig {
        key_prefix: format!("clipjob-test:{}", unique_suffix()),
        ..QueueConfig::from_env()
    };
    let backend = RedisBackend::connect(&config.redis_url)
        .await
        .expect("Failed to connect to Redis");
    backend.ping().await.expect("Redis ping failed");

    let backend: Arc<dyn KvBackend> = Arc::new(backend);
    (
        JobStore::new(Arc::clone(&backend), &config),
        JobQueue::new(backend, &config),
    )
}

fn unique_suffix() -> String {
    format!("{}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

/// Test job create, enqueue, claim and complete cycle.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_job_lifecycle() {
    let (store, queue) = setup().await;

    let job = store
        .create("proj-redis", "klap", serde_json::json!({ "url": "http://x" }))
        .await
        .expect("Failed to create job");
    queue.push(&job.id).await.expect("Failed to push");

    let id = queue.pop().await.expect("Failed to pop").expect("Queue empty");
    assert_eq!(id, job.id);

    let claimed = store.claim(&id).await.expect("Failed to claim");
    assert_eq!(claimed.attempts, 1);

    store
        .update(&id, &JobPatch::completed("r1"))
        .await
        .expect("Failed to complete");
    queue.mark_done(&id).await.expect("Failed to mark done");

    let stored = store
        .get_by_correlation_key("proj-redis")
        .await
        .expect("Failed to read")
        .expect("Job missing");
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.result.as_deref(), Some("r1"));
    assert!(queue.in_flight().await.expect("Failed to list").is_empty());
}

/// Test stale sweep against a real in-flight list.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_sweep_stale() {
    let (store, queue) = setup().await;

    let job = store
        .create("proj-stale", "klap", serde_json::json!({}))
        .await
        .expect("Failed to create job");
    queue.push(&job.id).await.expect("Failed to push");
    let id = queue.pop().await.expect("Failed to pop").expect("Queue empty");
    store.claim(&id).await.expect("Failed to claim");

    let report = queue
        .sweep_stale(&store, Duration::ZERO)
        .await
        .expect("Sweep failed");
    assert_eq!(report.reclaimed, vec![id.clone()]);
    assert_eq!(report.requeued, vec![id.clone()]);

    let stored = store.get(&id).await.expect("Failed to read").expect("Job missing");
    assert_eq!(stored.status, JobStatus::Queued);
    assert_eq!(stored.attempts, 1);
    assert!(queue.in_flight().await.expect("Failed to list").is_empty());
}
