//! Job orchestration worker binary.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use clipjob_queue::{JobQueue, JobStore, KvBackend, QueueConfig, RedisBackend};
use clipjob_tasks::{
    KlapClient, KlapConfig, KlapExportApi, SubmagicClient, TaskApiError, TaskApiResult, TaskRegistry,
};
use clipjob_worker::{metrics, JobExecutor, JobRunner, StaleJobSweeper, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();

    init_tracing()?;

    info!("Starting clipjob-worker");

    if let Some(port) = std::env::var("METRICS_PORT").ok().and_then(|s| s.parse().ok()) {
        metrics::install_prometheus(port).context("Failed to install Prometheus exporter")?;
        info!("Prometheus metrics on port {}", port);
    }

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let queue_config = QueueConfig::from_env();
    let redis = match RedisBackend::connect(&queue_config.redis_url).await {
        Ok(backend) => backend,
        Err(e) => {
            error!("Failed to connect to Redis: {}", e);
            std::process::exit(1);
        }
    };
    redis.ping().await.context("Redis did not answer PING")?;
    let backend: Arc<dyn KvBackend> = Arc::new(redis);

    let store = JobStore::new(Arc::clone(&backend), &queue_config);
    let queue = JobQueue::new(backend, &queue_config);

    let registry = build_registry()?;
    if registry.is_empty() {
        warn!("No task API keys configured; every job will fail with an unknown provider");
    } else {
        info!("Task providers: {:?}", registry.providers());
    }

    let runner = JobRunner::new(store.clone(), queue.clone(), registry);
    let executor = Arc::new(JobExecutor::new(config.clone(), runner));
    let shutdown = executor.shutdown_token();

    let sweeper = StaleJobSweeper::new(store, queue, &config);
    let sweeper_cancel = shutdown.clone();
    let sweeper_handle = tokio::spawn(async move { sweeper.run(sweeper_cancel).await });

    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
        }
        signal_executor.shutdown();
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    sweeper_handle.await.ok();
    info!("Worker shutdown complete");
    Ok(())
}

/// Colored output for dev, JSON for production.
fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("clipjob=info".parse()?)
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

/// Register every adapter whose API key is present.
fn build_registry() -> anyhow::Result<TaskRegistry> {
    let mut registry = TaskRegistry::new();

    if let Some(config) = optional(KlapConfig::from_env())? {
        registry.register(Arc::new(KlapClient::new(config.clone())?));
        registry.register(Arc::new(KlapExportApi::new(config)?));
    }
    if let Some(client) = optional(SubmagicClient::from_env())? {
        registry.register(Arc::new(client));
    }

    Ok(registry)
}

/// A missing key disables the provider; any other error is fatal.
fn optional<T>(result: TaskApiResult<T>) -> anyhow::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(TaskApiError::Config(msg)) if msg.ends_with("not set") => Ok(None),
        Err(e) => Err(e.into()),
    }
}
