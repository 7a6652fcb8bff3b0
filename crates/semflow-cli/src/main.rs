//! `semflow` binary: `serve` runs the HTTP API plus the worker pool and an
//! in-process process-state consumer; `consume` runs the process-state
//! consumer standalone (spec §6.5).

mod executor;
mod routes;
mod runtime;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use semflow_consumer::{InMemoryMessageBroker, ProcessStateConsumer};
use semflow_core::config::RuntimeConfig;
use semflow_storage::InMemoryProcessStateStore;
use semflow_worker::{WorkerPool, WorkerPoolConfig};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::runtime::RuntimeState;

#[derive(Parser)]
#[command(name = "semflow")]
#[command(about = "Semantic workflow execution runtime")]
#[command(version)]
struct Cli {
    /// Optional JSON config file; overridden by environment variables (spec §6.5
    /// flag > env > file > default precedence).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API, worker pool, and in-process process-state consumer.
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: String,
    },
    /// Start the process-state consumer standalone.
    Consume,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "semflow=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = RuntimeConfig::from_file_and_env(cli.config.as_deref())
        .context("failed to load runtime configuration")?;

    match cli.command {
        Commands::Serve { bind } => serve(config, bind).await,
        Commands::Consume => consume(config).await,
    }
}

async fn serve(config: RuntimeConfig, bind: String) -> Result<()> {
    tracing::info!("semflow serve starting");

    let state = RuntimeState::build(&config).await.context("failed to assemble runtime")?;

    let mut queue_widths = std::collections::HashMap::new();
    for queue_config in &config.queues {
        queue_widths.insert(queue_config.name.clone(), queue_config.worker_count);
    }
    let worker_config = WorkerPoolConfig {
        queue_widths,
        dequeue_timeout: config.dequeue_timeout,
        ..WorkerPoolConfig::default()
    };
    let worker_pool = WorkerPool::new(Arc::clone(&state.queue), Arc::clone(&state.executor) as _, worker_config);
    worker_pool.start().context("failed to start worker pool")?;
    tracing::info!("worker pool started");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = ProcessStateConsumer::new(
        Arc::clone(&state.broker) as Arc<dyn semflow_consumer::MessageBroker>,
        Arc::clone(&state.process_state_store),
    );
    let consumer_handle = tokio::spawn(async move {
        if let Err(e) = consumer.run(shutdown_rx).await {
            tracing::error!(error = %e, "process-state consumer exited with error");
        }
    });

    let app = routes::routes(routes::AppState {
        action_repository: Arc::clone(&state.action_repository),
        queue: Arc::clone(&state.queue),
    })
    .route("/health", axum::routing::get(routes::health))
    .route("/version", axum::routing::get(routes::version));

    let listener = tokio::net::TcpListener::bind(&bind).await.with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(%bind, "http api listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result.context("http server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    let _ = shutdown_tx.send(true);
    worker_pool.shutdown().await.context("worker pool shutdown failed")?;
    let _ = consumer_handle.await;

    tracing::info!("semflow serve stopped cleanly");
    Ok(())
}

async fn consume(config: RuntimeConfig) -> Result<()> {
    tracing::info!("semflow consume starting");
    let _ = &config;

    let store = Arc::new(InMemoryProcessStateStore::new());
    let broker: Arc<dyn semflow_consumer::MessageBroker> = Arc::new(InMemoryMessageBroker::new());
    let consumer = ProcessStateConsumer::new(broker, store);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(async move { consumer.run(shutdown_rx).await });

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    run.await.context("consumer task panicked")?.context("process-state consumer failed")?;

    tracing::info!("semflow consume stopped cleanly");
    Ok(())
}
