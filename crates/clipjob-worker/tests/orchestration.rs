//! End-to-end orchestration tests against the in-memory backend.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use clipjob_models::{JobPatch, JobStatus, TaskHandle, TaskStatus};
use clipjob_queue::{JobQueue, JobStore, KvBackend, MemoryBackend, QueueConfig, STALE_JOB_ERROR};
use clipjob_tasks::{TaskApi, TaskApiError, TaskApiResult, TaskRegistry};
use clipjob_worker::{
    JobExecutor, JobRunner, JobService, RunOutcome, StaleJobSweeper, WorkerConfig,
};
use serde_json::json;
use tokio_test::assert_err;

#[derive(Debug, Clone)]
enum Step {
    Processing,
    Ready(&'static str),
    Error(&'static str),
    Down,
}

/// Fake provider that replays a script of status answers, repeating the last.
struct ScriptedApi {
    steps: Mutex<VecDeque<Step>>,
    created: AtomicU32,
    checks: AtomicU32,
}

impl ScriptedApi {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            created: AtomicU32::new(0),
            checks: AtomicU32::new(0),
        })
    }

    fn created(&self) -> u32 {
        self.created.load(Ordering::SeqCst)
    }

    fn checks(&self) -> u32 {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskApi for ScriptedApi {
    fn name(&self) -> &str {
        "fake"
    }

    async fn create_task(&self, _payload: &serde_json::Value) -> TaskApiResult<TaskHandle> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TaskHandle::new(format!("task-{}", n)))
    }

    async fn task_status(&self, _task_id: &str) -> TaskApiResult<TaskStatus> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        let step = {
            let mut steps = self.steps.lock().unwrap();
            if steps.len() > 1 {
                steps.pop_front().unwrap()
            } else {
                steps.front().cloned().unwrap()
            }
        };
        match step {
            Step::Processing => Ok(TaskStatus::processing()),
            Step::Ready(out) => Ok(TaskStatus::ready(out)),
            Step::Error(msg) => Ok(TaskStatus::error(msg)),
            Step::Down => Err(TaskApiError::from_http_status(503, "upstream down", None)),
        }
    }
}

struct Harness {
    store: JobStore,
    queue: JobQueue,
    service: JobService,
    executor: Arc<JobExecutor>,
}

fn harness(api: Arc<ScriptedApi>, worker: WorkerConfig) -> Harness {
    let backend: Arc<dyn KvBackend> = Arc::new(MemoryBackend::new());
    let config = QueueConfig {
        key_prefix: "it".into(),
        ..Default::default()
    };
    let store = JobStore::new(Arc::clone(&backend), &config);
    let queue = JobQueue::new(backend, &config);
    let registry = TaskRegistry::new().with(api);
    let runner = JobRunner::new(store.clone(), queue.clone(), registry);

    Harness {
        service: JobService::new(store.clone(), queue.clone()),
        executor: Arc::new(JobExecutor::new(worker, runner)),
        store,
        queue,
    }
}

/// Run jobs inline until the queue drains.
async fn drain(executor: &JobExecutor) -> Vec<RunOutcome> {
    let mut outcomes = Vec::new();
    while let Some(outcome) = executor.process_next().await.unwrap() {
        outcomes.push(outcome);
    }
    outcomes
}

#[tokio::test(start_paused = true)]
async fn test_create_then_lookup_by_key() {
    let h = harness(ScriptedApi::new(vec![Step::Processing]), WorkerConfig::default());

    h.service
        .enqueue("fake", "proj-1", json!({ "url": "http://x" }))
        .await
        .unwrap();

    let job = h.service.status_for("proj-1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.attempts, 0);
    assert!(job.result.is_none() && job.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_processing_twice_then_ready() {
    let api = ScriptedApi::new(vec![Step::Processing, Step::Processing, Step::Ready("r1")]);
    let h = harness(Arc::clone(&api), WorkerConfig::default());
    let job = h.service.enqueue("fake", "proj-1", json!({})).await.unwrap();

    let outcomes = drain(&h.executor).await;
    assert_eq!(outcomes, vec![RunOutcome::Completed { result: "r1".into() }]);

    let stored = h.store.require(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.result.as_deref(), Some("r1"));
    assert!(stored.error.is_none());
    assert_eq!(stored.progress, 100);
    assert_eq!(api.checks(), 3);
    assert!(h.queue.in_flight().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_business_error_exhausts_budget() {
    let api = ScriptedApi::new(vec![Step::Error("render failed")]);
    let h = harness(Arc::clone(&api), WorkerConfig::default());
    let job = h
        .service
        .enqueue_with_max_attempts("fake", "proj-1", json!({}), 3)
        .await
        .unwrap();

    let outcomes = drain(&h.executor).await;
    assert_eq!(
        outcomes,
        vec![
            RunOutcome::Requeued { error: "render failed".into() },
            RunOutcome::Requeued { error: "render failed".into() },
            RunOutcome::Failed { error: "render failed".into() },
        ]
    );

    let stored = h.store.require(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.attempts, 3);
    assert_eq!(stored.error.as_deref(), Some("render failed"));
    assert!(stored.is_terminal());
    assert_eq!(api.created(), 3);
    assert!(h.queue.is_empty().await.unwrap());
    assert!(h.queue.in_flight().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_status_endpoint_is_infrastructure_failure() {
    let api = ScriptedApi::new(vec![Step::Down]);
    let h = harness(Arc::clone(&api), WorkerConfig::default());
    let job = h
        .service
        .enqueue_with_max_attempts("fake", "proj-1", json!({}), 1)
        .await
        .unwrap();

    let outcomes = drain(&h.executor).await;
    assert_eq!(outcomes.len(), 1);
    assert_eq!(api.checks(), 6);

    let stored = h.store.require(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    let error = stored.error.unwrap();
    assert!(error.contains("6 consecutive times"), "unexpected error: {}", error);
    assert!(error.contains("503"));
}

#[tokio::test(start_paused = true)]
async fn test_retries_until_success_count_dequeues() {
    let api = ScriptedApi::new(vec![Step::Error("flaky"), Step::Error("flaky"), Step::Ready("r2")]);
    let h = harness(Arc::clone(&api), WorkerConfig::default());
    let job = h
        .service
        .enqueue_with_max_attempts("fake", "proj-1", json!({}), 3)
        .await
        .unwrap();

    let outcomes = drain(&h.executor).await;
    let requeues = outcomes
        .iter()
        .filter(|o| matches!(o, RunOutcome::Requeued { .. }))
        .count() as u32;

    let stored = h.store.require(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.attempts, requeues + 1);
    assert_eq!(api.created(), stored.attempts);
    assert!(stored.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_completed_job_stays_completed() {
    let api = ScriptedApi::new(vec![Step::Ready("r1")]);
    let h = harness(api, WorkerConfig::default());
    let job = h.service.enqueue("fake", "proj-1", json!({})).await.unwrap();
    drain(&h.executor).await;

    assert_err!(h.store.update(&job.id, &JobPatch::requeued()).await);
    assert_err!(h.store.update(&job.id, &JobPatch::failed("late")).await);
    assert_err!(h.service.retry(&job.id).await);

    let stored = h.store.require(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.result.as_deref(), Some("r1"));
}

fn sweeper(h: &Harness) -> StaleJobSweeper {
    StaleJobSweeper::new(
        h.store.clone(),
        h.queue.clone(),
        &WorkerConfig {
            stale_after: Duration::ZERO,
            ..Default::default()
        },
    )
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_job_is_requeued_by_sweep() {
    let api = ScriptedApi::new(vec![Step::Ready("r2")]);
    let h = harness(api, WorkerConfig::default());
    let job = h.service.enqueue("fake", "proj-1", json!({})).await.unwrap();

    // A worker pops and claims, then dies without settling
    let id = h.queue.pop().await.unwrap().unwrap();
    h.store.claim(&id).await.unwrap();

    let report = sweeper(&h).sweep_once().await.unwrap();
    assert_eq!(report.reclaimed, vec![job.id.clone()]);
    assert_eq!(report.requeued, vec![job.id.clone()]);
    assert!(h.queue.in_flight().await.unwrap().is_empty());

    let stored = h.store.require(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Queued);
    assert_eq!(stored.attempts, 1);

    // The next worker picks it up and finishes on the second attempt
    drain(&h.executor).await;
    let stored = h.store.require(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.attempts, 2);
    assert_eq!(stored.result.as_deref(), Some("r2"));
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_job_on_last_attempt_becomes_visible_failure() {
    let h = harness(ScriptedApi::new(vec![Step::Processing]), WorkerConfig::default());
    let job = h
        .service
        .enqueue_with_max_attempts("fake", "proj-1", json!({}), 1)
        .await
        .unwrap();

    let id = h.queue.pop().await.unwrap().unwrap();
    h.store.claim(&id).await.unwrap();

    let report = sweeper(&h).sweep_once().await.unwrap();
    assert_eq!(report.reclaimed, vec![job.id.clone()]);
    assert!(report.requeued.is_empty());

    let stored = h.store.require(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.error.as_deref(), Some(STALE_JOB_ERROR));
    assert!(stored.is_terminal());
    assert!(h.queue.in_flight().await.unwrap().is_empty());
    assert!(h.queue.is_empty().await.unwrap());
    assert_err!(h.service.retry(&job.id).await);
}

#[tokio::test(start_paused = true)]
async fn test_runner_abandons_job_reclaimed_by_sweeper() {
    let api = ScriptedApi::new(vec![Step::Processing]);
    let h = harness(api, WorkerConfig::default());
    let job = h.service.enqueue("fake", "proj-1", json!({})).await.unwrap();

    let executor = Arc::clone(&h.executor);
    let run = tokio::spawn(async move { executor.process_next().await });

    // Let the runner create its task and start polling, then reclaim underneath it
    tokio::time::sleep(Duration::from_secs(45)).await;
    let report = sweeper(&h).sweep_once().await.unwrap();
    assert_eq!(report.requeued, vec![job.id.clone()]);

    let outcome = run.await.unwrap().unwrap();
    assert_eq!(outcome, Some(RunOutcome::Abandoned));

    // The abandoned runner leaves the requeued job alone
    let stored = h.store.require(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Queued);
    assert_eq!(stored.attempts, 1);
    assert_eq!(h.queue.len().await.unwrap(), 1);
    assert!(h.queue.in_flight().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_executor_runs_jobs_concurrently() {
    let api = ScriptedApi::new(vec![Step::Processing, Step::Ready("out")]);
    let h = harness(
        Arc::clone(&api),
        WorkerConfig {
            max_concurrent_jobs: 3,
            ..Default::default()
        },
    );

    let mut ids = Vec::new();
    for n in 0..5 {
        let job = h
            .service
            .enqueue("fake", &format!("proj-{}", n), json!({}))
            .await
            .unwrap();
        ids.push(job.id);
    }

    let executor = Arc::clone(&h.executor);
    let handle = tokio::spawn(async move { executor.run().await });

    tokio::time::sleep(Duration::from_secs(120)).await;
    h.executor.shutdown();
    handle.await.unwrap().unwrap();

    let jobs = futures::future::join_all(ids.iter().map(|id| h.store.require(id))).await;
    for job in jobs {
        let job = job.unwrap();
        assert_eq!(job.status, JobStatus::Completed, "job {} not completed", job.id);
        assert_eq!(job.result.as_deref(), Some("out"));
    }
    assert_eq!(api.created(), 5);
    assert!(h.queue.in_flight().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_hands_running_job_back() {
    let api = ScriptedApi::new(vec![Step::Processing]);
    let h = harness(api, WorkerConfig::default());
    let job = h.service.enqueue("fake", "proj-1", json!({})).await.unwrap();

    let executor = Arc::clone(&h.executor);
    let handle = tokio::spawn(async move { executor.run().await });

    tokio::time::sleep(Duration::from_secs(100)).await;
    h.executor.shutdown();
    handle.await.unwrap().unwrap();

    let stored = h.store.require(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Queued);
    assert_eq!(stored.attempts, 1);
    assert!(stored.error.is_none());
    assert_eq!(h.queue.len().await.unwrap(), 1);
    assert!(h.queue.in_flight().await.unwrap().is_empty());
}
