//! Research worker process: loops, scheduler and optional retention sweep.

use anyhow::Context;
use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use swarm_db::{Backends, Database, PoolConfig};
use swarm_jobs::{RetentionSweep, WorkerBuilder, WorkerConfig, WorkerEvent};

async fn backends_from_env(config: &WorkerConfig) -> anyhow::Result<Backends> {
    match std::env::var("DATABASE_URL") {
        Ok(url) if !url.is_empty() => {
            let pool_config = PoolConfig::from_env().for_workers(config.worker_concurrency);
            let db = Database::connect_with_config(&url, pool_config)
                .await
                .context("failed to connect to database")?;
            db.migrate().await.context("failed to run migrations")?;
            info!("Using PostgreSQL job store");
            Ok(db.backends())
        }
        _ => {
            warn!("DATABASE_URL not set, using in-memory job store (state is lost on exit)");
            Ok(Backends::in_memory())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   RUST_LOG    - standard env filter (default: "swarm_jobs=info,swarm_agents=info")
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "swarm_jobs=info,swarm_agents=info,swarm_db=info".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let path = std::path::Path::new(path);
        let file_dir = path.parent().unwrap_or(std::path::Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("swarm-worker.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(non_blocking),
                )
                .init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            registry.with(tracing_subscriber::fmt::layer()).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let config = WorkerConfig::from_env();
    let backends = backends_from_env(&config).await?;
    let searcher = swarm_agents::searcher_from_env().context("failed to configure searcher")?;

    if let Some(sweep) = RetentionSweep::from_env(backends.store.clone()) {
        sweep
            .run_once(Utc::now())
            .await
            .context("retention sweep failed")?;
    }

    let handle = WorkerBuilder::from_backends(backends)
        .with_config(config)
        .with_searcher(searcher)
        .build()?
        .start();

    if !handle.is_running() {
        return Ok(());
    }

    let mut events = handle.events();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(WorkerEvent::WorkerStopped) | Err(RecvError::Closed) => break,
                Ok(event) => debug!(?event, "Worker event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Worker event log lagged"),
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received, finishing in-flight jobs");

    handle.shutdown().await?;
    let _ = event_log.await;
    Ok(())
}
