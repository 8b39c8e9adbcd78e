//! Workmill Daemon - Main Entry Point
//! Hosts one JobQueue: producer bootstrap, consumer lifecycle, signal-driven stop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use workmill_core::domain::Job;
use workmill_core::port::handler::{HandlerError, JobHandler};
use workmill_core::port::HandlerRegistry;
use workmill_core::{EnqueueRequest, JobQueue, QueueConfig};
use workmill_infra_sqlite::SqliteStoreProvider;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_DB_PATH: &str = "~/.workmill/queue.db";
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Built-in smoke handler: logs the payload it was given.
///
/// Embedding applications register their own handlers; this one keeps a
/// bare daemon observable end to end.
struct EchoHandler;

#[async_trait]
impl JobHandler for EchoHandler {
    async fn handle(&self, job: &Job) -> Result<(), HandlerError> {
        info!(job_id = %job.id, payload = %job.payload.as_value(), "echo");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize logging (pretty for development, json for production)
    let log_format = std::env::var("WORKMILL_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("workmill=info"))
        .context("Failed to create env filter")?;

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }

    info!("Workmill v{} starting...", VERSION);

    // 2. Load configuration
    let db_path =
        std::env::var("WORKMILL_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
    let db_path = shellexpand::tilde(&db_path).into_owned();

    let defaults = QueueConfig::default();
    let config = QueueConfig {
        schema: std::env::var("WORKMILL_SCHEMA").unwrap_or_else(|_| defaults.schema.clone()),
        poll_interval: env_parsed("WORKMILL_POLL_INTERVAL_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval),
        concurrency: env_parsed("WORKMILL_CONCURRENCY").unwrap_or(defaults.concurrency),
        max_attempts: env_parsed("WORKMILL_MAX_ATTEMPTS").unwrap_or(defaults.max_attempts),
        prepared_statements: defaults.prepared_statements,
        priority: defaults.priority,
    };

    info!(db_path = %db_path, schema = %config.schema, "Initializing queue...");

    if !db_path.contains(":memory:") {
        if let Some(parent) = std::path::Path::new(&db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
    }

    // 3. Wire the queue (DI at the composition root)
    let provider = Arc::new(SqliteStoreProvider::new(db_path, &config));
    let queue = Arc::new(JobQueue::new(provider, config));

    // 4. Producer bootstrap: pool, probe, migrations
    queue
        .connect_producer()
        .await
        .context("Producer bootstrap failed")?;

    // 5. Start the consumer
    let mut handlers = HandlerRegistry::new();
    handlers.register("echo", Arc::new(EchoHandler));
    queue
        .start_consumer(handlers)
        .await
        .context("Consumer start failed")?;

    // 6. Smoke job so a fresh install shows a full round trip in the log
    queue
        .enqueue(
            "echo",
            EnqueueRequest::new(serde_json::json!({"hello": "workmill"})),
        )
        .await
        .context("Startup enqueue failed")?;

    info!("System ready. Press Ctrl+C to shutdown");

    // 7. Wait for shutdown signal. The queue itself never touches signals;
    // this process drives the stop path exactly once.
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    // 8. Graceful shutdown: drain the consumer, then close the producer
    let stop = {
        let queue = Arc::clone(&queue);
        async move { queue.stop_consumer().await }
    };
    match tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, stop).await {
        Ok(result) => result.context("Consumer stop failed")?,
        Err(_) => warn!(
            "Consumer drain exceeded {:?}; exiting anyway",
            SHUTDOWN_DRAIN_TIMEOUT
        ),
    }
    queue
        .disconnect_producer()
        .await
        .context("Producer disconnect failed")?;

    info!("Shutdown complete.");
    Ok(())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
