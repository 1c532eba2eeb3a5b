//! Component factory for environment-based configuration
//!
//! Builds the [`ServiceConfig`] and the components it describes from
//! environment variables, so binaries can switch between in-memory development
//! backends and persistent ones.

use crate::engine::{InMemoryEngine, Partition, Table, TabularEngine};
use crate::jobs::{InMemoryJobQueue, JobChannel, JobChannels, ObjectStoreStatusStore, OperationCategory};
use crate::partitioning::QueryTemplates;
use crate::retry::{RetryPolicy, WaitPattern, DEFAULT_WAIT_SECONDS};
use crate::{EngineSettings, Error, Result, ServiceConfig, StatusBackend, StorageConfig};
use object_store::local::LocalFileSystem;
use object_store::ObjectStore;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Table of an engine seed file
#[derive(Debug, Deserialize)]
struct SeedTable {
    name: String,
    #[serde(default)]
    partitions: Vec<SeedPartition>,
}

/// Partition of an engine seed file; `query` wins over `expression`.
#[derive(Debug, Deserialize)]
struct SeedPartition {
    name: String,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    expression: Option<String>,
}

pub struct ComponentFactory;

impl ComponentFactory {
    /// Read the service configuration from the environment
    ///
    /// Environment variables:
    /// - ENGINE_BACKEND: "memory" (default)
    /// - ENGINE_SEED_FILE: JSON file of databases loaded into the memory backend
    /// - TABULAR_CONNECTION_STRING: engine connection string
    /// - TABULAR_DATABASE: database used when a request names none (default: default)
    /// - MAXIMUM_RETRIES: commit retries after the first attempt (default: 0)
    /// - WAIT_TIME_IN_SECONDS: base retry wait (default: 30; non-positive means 30)
    /// - RETRY_WAIT_PATTERN: Equal (default), Progressive or RandomlyProgressive
    /// - STATUS_BACKEND: "memory" (default) or "local"
    /// - STATUS_ROOT: directory for the local status backend
    /// - STATUS_PREFIX: key prefix for status records (default: status/)
    /// - QUERY_TEMPLATES_FILE: JSON object of table name to source query template
    ///
    /// Unparsable retry values fall back to their defaults.
    pub fn service_config_from_env() -> Result<ServiceConfig> {
        let var = |name: &str| std::env::var(name).ok();

        let defaults = EngineSettings::default();
        let engine = EngineSettings {
            backend: var("ENGINE_BACKEND").unwrap_or(defaults.backend),
            connection_string: var("TABULAR_CONNECTION_STRING").unwrap_or_default(),
            database: var("TABULAR_DATABASE")
                .filter(|db| !db.trim().is_empty())
                .unwrap_or(defaults.database),
            seed_file: var("ENGINE_SEED_FILE").map(PathBuf::from),
        };

        let retry = retry_policy_from(
            var("MAXIMUM_RETRIES").as_deref(),
            var("WAIT_TIME_IN_SECONDS").as_deref(),
            var("RETRY_WAIT_PATTERN").as_deref(),
        );

        let status_backend = match var("STATUS_BACKEND") {
            Some(value) => value.parse::<StatusBackend>().map_err(Error::Config)?,
            None => StatusBackend::Memory,
        };
        let storage = StorageConfig {
            status_backend,
            status_root: var("STATUS_ROOT").map(PathBuf::from),
            status_prefix: var("STATUS_PREFIX").unwrap_or_else(|| "status/".to_string()),
        };

        Ok(ServiceConfig {
            engine,
            retry,
            storage,
            query_templates_file: var("QUERY_TEMPLATES_FILE").map(PathBuf::from),
        })
    }

    /// Create the engine named by `settings.backend`
    pub fn create_engine(settings: &EngineSettings) -> Result<Arc<dyn TabularEngine>> {
        match settings.backend.trim().to_ascii_lowercase().as_str() {
            "memory" => {
                let engine = InMemoryEngine::new();
                match &settings.seed_file {
                    Some(path) => {
                        let databases = Self::seed_engine(&engine, path)?;
                        info!(
                            "Using in-memory tabular engine seeded with {} databases from {}",
                            databases,
                            path.display()
                        );
                    }
                    None => warn!(
                        "Using empty in-memory tabular engine; set ENGINE_SEED_FILE to load databases"
                    ),
                }
                Ok(Arc::new(engine))
            }
            other => Err(Error::Config(format!(
                "Unknown ENGINE_BACKEND: {}. Use 'memory'",
                other
            ))),
        }
    }

    /// Load the databases of a seed file into `engine`, returning how many were loaded.
    ///
    /// The file is a JSON object of database name to tables:
    /// `{"Sales": [{"name": "Orders", "partitions": [{"name": "Orders", "query": "SELECT ..."}]}]}`
    pub fn seed_engine(engine: &InMemoryEngine, path: &Path) -> Result<usize> {
        let raw = std::fs::read_to_string(path)?;
        let databases: BTreeMap<String, Vec<SeedTable>> = serde_json::from_str(&raw)?;

        for (database, tables) in &databases {
            let tables = tables
                .iter()
                .map(|seed| {
                    seed.partitions
                        .iter()
                        .fold(Table::new(&seed.name), |table, p| {
                            let partition = match (&p.query, &p.expression) {
                                (Some(query), _) => Partition::query(&p.name, query),
                                (None, Some(expression)) => Partition::expression(&p.name, expression),
                                (None, None) => Partition::query(&p.name, ""),
                            };
                            table.with_partition(partition)
                        })
                })
                .collect();
            engine.insert_database(database, tables);
        }
        Ok(databases.len())
    }

    /// Create one queue and status store per operation category
    pub fn create_job_channels(storage: &StorageConfig) -> Result<JobChannels> {
        match storage.status_backend {
            StatusBackend::Memory => {
                info!("Using in-memory job status stores");
                Ok(JobChannels::in_memory())
            }
            StatusBackend::Local => {
                let root = storage.status_root.as_ref().ok_or_else(|| {
                    Error::Config("STATUS_ROOT required when STATUS_BACKEND=local".to_string())
                })?;
                std::fs::create_dir_all(root)?;
                let object_store: Arc<dyn ObjectStore> =
                    Arc::new(LocalFileSystem::new_with_prefix(root)?);

                info!(
                    "Using local job status stores: root={}, prefix={}",
                    root.display(),
                    storage.status_prefix
                );

                let channel = |category: OperationCategory| {
                    JobChannel::new(
                        Arc::new(InMemoryJobQueue::new()),
                        Arc::new(ObjectStoreStatusStore::new(
                            object_store.clone(),
                            format!("{}{}/", storage.status_prefix, category.as_str()),
                        )),
                    )
                };
                Ok(JobChannels {
                    model: channel(OperationCategory::Model),
                    table: channel(OperationCategory::Table),
                    partition: channel(OperationCategory::Partition),
                })
            }
        }
    }

    /// Built-in query templates, overlaid with `path` when given
    pub fn load_query_templates(path: Option<&Path>) -> Result<QueryTemplates> {
        match path {
            Some(path) => {
                let templates = QueryTemplates::from_json_file(path)?;
                info!(
                    "Loaded {} query templates from {}",
                    templates.len(),
                    path.display()
                );
                Ok(templates)
            }
            None => Ok(QueryTemplates::with_defaults()),
        }
    }
}

/// Retry policy from raw setting values; unparsable values use defaults.
pub fn retry_policy_from(
    max_retries: Option<&str>,
    wait_seconds: Option<&str>,
    wait_pattern: Option<&str>,
) -> RetryPolicy {
    let max_retries = max_retries
        .and_then(|v| v.trim().parse::<i64>().ok())
        .map(|v| v.clamp(0, u32::MAX as i64) as u32)
        .unwrap_or(0);

    let base_wait_seconds = wait_seconds
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|v| *v > 0)
        .map(|v| v as u64)
        .unwrap_or(DEFAULT_WAIT_SECONDS);

    let wait_pattern = match wait_pattern.map(str::parse::<WaitPattern>) {
        Some(Ok(pattern)) => pattern,
        Some(Err(e)) => {
            warn!(error = %e, "Ignoring RETRY_WAIT_PATTERN");
            WaitPattern::Equal
        }
        None => WaitPattern::Equal,
    };

    RetryPolicy::new(max_retries, wait_pattern, base_wait_seconds)
}
