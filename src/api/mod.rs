//! HTTP API
//!
//! Routes under `/api/v1/tabular`:
//! - refresh of a model, tables, or a partition, synchronously or as a queued job
//! - partition existence, creation, merge, and monthly repartitioning
//! - job status lookup

mod error;
mod partitions;
mod process;
mod status;
mod telemetry;

pub use error::ApiError;

use crate::jobs::JobPipeline;
use crate::lifecycle::PartitionManager;
use crate::planner::RepartitionPlanner;
use axum::Router;
use serde::Serialize;

/// Handler result
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub http_port: u16,
    /// Maximum request body size
    pub max_body_size: usize,
    pub enable_cors: bool,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            max_body_size: 2 * 1024 * 1024, // 2MB
            enable_cors: true,
        }
    }
}

/// Shared API state
#[derive(Clone)]
pub struct ApiState {
    pub manager: PartitionManager,
    pub pipeline: JobPipeline,
    pub planner: RepartitionPlanner,
}

/// Plain result message, optionally with the number of objects affected
#[derive(Debug, Serialize)]
pub struct ResultMessage {
    pub result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl ResultMessage {
    pub fn new(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            count: None,
        }
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }
}

/// Build the HTTP API router
pub fn build_http_router(state: ApiState, config: &ApiServerConfig) -> Router {
    use axum::extract::DefaultBodyLimit;
    use axum::middleware;
    use axum::routing::{get, post, put};
    use tower_http::cors::{Any, CorsLayer};

    let tabular = Router::new()
        // Refresh
        .route("/:db/process", post(process::process_model))
        .route("/:db/process/async", post(process::process_model_async))
        .route("/:db/tables/:table/process", post(process::process_tables))
        .route(
            "/:db/tables/:table/process/async",
            post(process::process_table_async),
        )
        .route(
            "/:db/tables/:table/partitions/:partition/process",
            post(process::process_partition),
        )
        .route(
            "/:db/tables/:table/partitions/:partition/process/async",
            post(process::process_partition_async),
        )

        // Structure
        .route(
            "/:db/tables/:table/partitions/:partition/exists",
            get(partitions::partition_exists),
        )
        .route(
            "/:db/tables/:table/partitions/new",
            post(partitions::create_partitions),
        )
        .route("/:db/tables/:table/merge", put(partitions::merge_partitions))
        .route(
            "/:db/tables/:table/repartition/:count",
            post(partitions::repartition),
        )
        .route(
            "/:db/tables/:table/repartition/:count/bydate/:date",
            post(partitions::repartition_by_date),
        )

        // Job status
        .route(
            "/status/:operation/:partition_key/:tracking_id",
            get(status::get_status),
        );

    let router = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .nest("/api/v1/tabular", tabular)
        .with_state(state)
        .layer(DefaultBodyLimit::max(config.max_body_size))
        .layer(middleware::from_fn(telemetry::http_observability_middleware));

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        router.layer(cors)
    } else {
        router
    }
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Readiness check endpoint
async fn ready_check() -> &'static str {
    "READY"
}
