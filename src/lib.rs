//! # Tabulon
//!
//! Partition lifecycle and refresh orchestration for tabular analytical models.
//!
//! Tabulon creates, merges, and refreshes named partitions inside the tables
//! of a remote analytical database, and runs long refreshes as tracked
//! asynchronous jobs.
//!
//! ## Architecture
//!
//! - **Partitioning**: date-keyed partition names and templated source queries
//! - **Retry**: commit with bounded retry and pluggable backoff
//! - **Lifecycle**: create / replace / merge / refresh against the engine
//! - **Jobs**: queue submission, dequeue-and-execute, status lookup
//! - **Planner**: monthly repartitioning spanning N periods back from a date
//! - **API**: HTTP adapter over all of the above

pub mod api;
pub mod clock;
pub mod config;
pub mod engine;
pub mod jobs;
pub mod lifecycle;
pub mod partitioning;
pub mod planner;
pub mod retry;
pub mod telemetry;

mod error;

pub use error::{Error, Result};

use retry::RetryPolicy;

/// Configuration for a Tabulon process
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    /// Engine connection
    pub engine: EngineSettings,
    /// Commit retry policy
    pub retry: RetryPolicy,
    /// Queue and status store configuration
    pub storage: StorageConfig,
    /// Optional JSON file of per-table source query templates
    pub query_templates_file: Option<std::path::PathBuf>,
}

/// Engine connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Engine backend name (only `memory` ships with this crate)
    pub backend: String,
    /// Connection string passed to the engine on connect
    pub connection_string: String,
    /// Database used when a request does not name one
    pub database: String,
    /// JSON file of databases to load into the `memory` backend at startup
    pub seed_file: Option<std::path::PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            connection_string: String::new(),
            database: "default".to_string(),
            seed_file: None,
        }
    }
}

/// Where job status records are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusBackend {
    Memory,
    /// Object store rooted at a local directory
    Local,
}

impl StatusBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Local => "local",
        }
    }
}

impl std::str::FromStr for StatusBackend {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "local" | "object_store" | "file" => Ok(Self::Local),
            other => Err(format!(
                "unknown status backend '{}'; expected one of memory, local",
                other
            )),
        }
    }
}

/// Status store configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub status_backend: StatusBackend,
    /// Root directory for the local backend
    pub status_root: Option<std::path::PathBuf>,
    /// Key prefix for status records
    pub status_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            status_backend: StatusBackend::Memory,
            status_root: None,
            status_prefix: "status/".to_string(),
        }
    }
}

/// Re-exports for convenience
pub mod prelude {
    pub use crate::engine::{InMemoryEngine, RefreshScope, TabularEngine};
    pub use crate::jobs::{JobPipeline, JobStatus, OperationCategory, ProcessingTrackingInfo};
    pub use crate::lifecycle::{MergeSpec, PartitionManager, PartitionSpec};
    pub use crate::partitioning::{Granularity, QueryTemplates};
    pub use crate::planner::RepartitionPlanner;
    pub use crate::retry::{RetryPolicy, SaveOrchestrator, WaitPattern};
    pub use crate::{EngineSettings, Error, Result, ServiceConfig, StorageConfig};
}
