//! Tabulon Server Binary
//!
//! HTTP API plus an in-process worker draining the job queues.
//!
//! The only engine backend is the in-memory one. Without `ENGINE_SEED_FILE`
//! it starts empty and every database lookup answers not found, so point it
//! at a seed file to serve a model.

use tabulon::api::{self, ApiServerConfig, ApiState};
use tabulon::config::ComponentFactory;
use tabulon::jobs::{JobPipeline, JobWorker};
use tabulon::lifecycle::PartitionManager;
use tabulon::planner::RepartitionPlanner;
use tabulon::retry::SaveOrchestrator;
use tabulon::telemetry::Telemetry;
use tabulon::Error;

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Tabulon Server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// HTTP API port
    #[arg(long, env = "TABULON_HTTP_PORT", default_value = "8080")]
    http_port: u16,

    /// Maximum request body size in bytes
    #[arg(long, default_value = "2097152")]
    max_body_size: usize,

    /// Disable permissive CORS headers
    #[arg(long)]
    no_cors: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let _telemetry = Telemetry::init_for_component("tabulon-server", &args.log_level)?;

    info!("Starting Tabulon server");

    let config = ComponentFactory::service_config_from_env()?;
    let shutdown = CancellationToken::new();

    let engine = ComponentFactory::create_engine(&config.engine)?;
    let saver = SaveOrchestrator::new(config.retry).with_cancellation(shutdown.clone());
    let manager = PartitionManager::new(engine, config.engine.clone(), saver);

    let templates = Arc::new(ComponentFactory::load_query_templates(
        config.query_templates_file.as_deref(),
    )?);
    let channels = ComponentFactory::create_job_channels(&config.storage)?;
    let pipeline = JobPipeline::new(manager.clone(), channels);
    let planner = RepartitionPlanner::new(manager.clone(), templates);

    let worker = JobWorker::new(pipeline.clone());
    let worker_shutdown = shutdown.clone();
    let worker_handle = tokio::spawn(async move { worker.run(worker_shutdown).await });

    let api_config = ApiServerConfig {
        http_port: args.http_port,
        max_body_size: args.max_body_size,
        enable_cors: !args.no_cors,
    };
    let router = api::build_http_router(
        ApiState {
            manager,
            pipeline,
            planner,
        },
        &api_config,
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], api_config.http_port));
    let listener = TcpListener::bind(addr).await?;

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_shutdown.cancel();
    });

    info!(
        http_port = api_config.http_port,
        database = %config.engine.database,
        max_retries = config.retry.max_retries,
        wait_pattern = config.retry.wait_pattern.as_str(),
        status_backend = config.storage.status_backend.as_str(),
        "Server ready"
    );

    let http_shutdown = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { http_shutdown.cancelled().await })
        .await
        .map_err(|e| Error::Internal(format!("HTTP server error: {e}")))?;

    worker_handle
        .await
        .map_err(|e| Error::Internal(format!("Job worker panicked: {e}")))?;

    info!("Server shutting down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
