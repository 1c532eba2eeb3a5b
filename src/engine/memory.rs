//! In-memory engine for development and testing
//!
//! Commits are applied atomically against a shared database map. Faults can
//! be injected to exercise retry and failure paths: transient commit
//! conflicts, failing connects, and failing disconnects.

use super::{EngineSession, Model, ModelChange, RefreshScope, RefreshTarget, Table};
use crate::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// A refresh applied by a commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRecord {
    pub database: String,
    pub target: RefreshTarget,
    pub scope: RefreshScope,
}

/// A merge applied by a commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRecord {
    pub database: String,
    pub table: String,
    pub target: String,
    pub sources: Vec<String>,
}

#[derive(Debug, Default)]
struct EngineState {
    /// Databases keyed by lowercase name
    databases: DashMap<String, RwLock<Vec<Table>>>,
    connects: AtomicU64,
    disconnects: AtomicU64,
    commit_attempts: AtomicU64,
    commits_applied: AtomicU64,
    /// Number of upcoming commits to reject as transient conflicts
    failing_commits: AtomicU32,
    fail_connect: AtomicBool,
    fail_disconnect: AtomicBool,
    refreshes: Mutex<Vec<RefreshRecord>>,
    merges: Mutex<Vec<MergeRecord>>,
}

/// In-memory tabular engine
#[derive(Debug, Clone, Default)]
pub struct InMemoryEngine {
    state: Arc<EngineState>,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a database.
    pub fn insert_database(&self, database: &str, tables: Vec<Table>) {
        self.state
            .databases
            .insert(database.to_lowercase(), RwLock::new(tables));
    }

    /// Add a table to an existing database, creating the database if needed.
    pub fn insert_table(&self, database: &str, table: Table) {
        let entry = self
            .state
            .databases
            .entry(database.to_lowercase())
            .or_default();
        let mut tables = entry.write();
        tables.retain(|t| !t.name.eq_ignore_ascii_case(&table.name));
        tables.push(table);
    }

    /// Snapshot of a table as currently committed.
    pub fn table(&self, database: &str, table: &str) -> Option<Table> {
        let db = self.state.databases.get(&database.to_lowercase())?;
        let tables = db.read();
        tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(table))
            .cloned()
    }

    pub fn partition_names(&self, database: &str, table: &str) -> Vec<String> {
        self.table(database, table)
            .map(|t| t.partition_names())
            .unwrap_or_default()
    }

    /// Reject the next `count` commits with a transient conflict.
    pub fn fail_next_commits(&self, count: u32) {
        self.state.failing_commits.store(count, Ordering::SeqCst);
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_disconnect(&self, fail: bool) {
        self.state.fail_disconnect.store(fail, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> u64 {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> u64 {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    pub fn commit_attempts(&self) -> u64 {
        self.state.commit_attempts.load(Ordering::SeqCst)
    }

    pub fn commits_applied(&self) -> u64 {
        self.state.commits_applied.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> Vec<RefreshRecord> {
        self.state.refreshes.lock().clone()
    }

    pub fn merges(&self) -> Vec<MergeRecord> {
        self.state.merges.lock().clone()
    }
}

#[async_trait]
impl super::TabularEngine for InMemoryEngine {
    async fn connect(&self, _connection_string: &str) -> Result<Box<dyn EngineSession>> {
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::Engine("connection refused".to_string()));
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemorySession {
            state: Arc::clone(&self.state),
            connected: true,
        }))
    }
}

struct InMemorySession {
    state: Arc<EngineState>,
    connected: bool,
}

impl InMemorySession {
    fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(Error::Engine("session is disconnected".to_string()))
        }
    }
}

fn table_index(tables: &[Table], name: &str) -> Result<usize> {
    tables
        .iter()
        .position(|t| t.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| Error::Engine(format!("table {} no longer exists", name)))
}

/// Apply one change to a scratch copy of the committed tables.
fn apply_change(
    database: &str,
    tables: &mut [Table],
    change: &ModelChange,
    refreshes: &mut Vec<RefreshRecord>,
    merges: &mut Vec<MergeRecord>,
) -> Result<()> {
    match change {
        ModelChange::AddPartition { table, partition } => {
            let idx = table_index(tables, table)?;
            if tables[idx].find_partition(&partition.name).is_some() {
                return Err(Error::TransientCommit(format!(
                    "partition {}/{} was created concurrently",
                    table, partition.name
                )));
            }
            tables[idx].partitions.push(partition.clone());
        }
        ModelChange::RemovePartition { table, partition } => {
            let idx = table_index(tables, table)?;
            let before = tables[idx].partitions.len();
            tables[idx]
                .partitions
                .retain(|p| !p.name.eq_ignore_ascii_case(partition));
            if tables[idx].partitions.len() == before {
                return Err(Error::TransientCommit(format!(
                    "partition {}/{} was removed concurrently",
                    table, partition
                )));
            }
        }
        ModelChange::Refresh { target, scope } => {
            refreshes.push(RefreshRecord {
                database: database.to_string(),
                target: target.clone(),
                scope: *scope,
            });
        }
        ModelChange::Merge {
            table,
            target,
            sources,
        } => {
            let idx = table_index(tables, table)?;
            let table_ref = &mut tables[idx];
            let mut merged = Vec::new();
            table_ref.partitions.retain(|p| {
                let is_source = sources.iter().any(|s| s.eq_ignore_ascii_case(&p.name))
                    && !p.name.eq_ignore_ascii_case(target);
                if is_source {
                    merged.push(p.name.clone());
                }
                !is_source
            });
            let target_partition = table_ref.find_partition_mut(target).ok_or_else(|| {
                Error::Engine(format!("merge target {}/{} does not exist", table, target))
            })?;
            target_partition.merged_from.extend(merged.iter().cloned());
            merges.push(MergeRecord {
                database: database.to_string(),
                table: table.clone(),
                target: target.clone(),
                sources: merged,
            });
        }
    }
    Ok(())
}

#[async_trait]
impl EngineSession for InMemorySession {
    async fn open_model(&mut self, database: &str) -> Result<Model> {
        self.ensure_connected()?;
        let db = self
            .state
            .databases
            .get(&database.to_lowercase())
            .ok_or_else(|| Error::NotFound(format!("database {}", database)))?;
        let tables = db.read().clone();
        Ok(Model::new(database, tables))
    }

    async fn save_changes(&mut self, model: &mut Model) -> Result<()> {
        self.ensure_connected()?;
        self.state.commit_attempts.fetch_add(1, Ordering::SeqCst);

        let injected = self
            .state
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if let Ok(remaining) = injected {
            return Err(Error::TransientCommit(format!(
                "injected commit conflict ({} remaining)",
                remaining - 1
            )));
        }

        let db = self
            .state
            .databases
            .get(&model.database().to_lowercase())
            .ok_or_else(|| Error::NotFound(format!("database {}", model.database())))?;

        let mut tables = db.write();
        let mut scratch = tables.clone();
        let mut refreshes = Vec::new();
        let mut merges = Vec::new();
        for change in model.pending_changes() {
            apply_change(
                model.database(),
                &mut scratch,
                change,
                &mut refreshes,
                &mut merges,
            )?;
        }

        *tables = scratch;
        drop(tables);
        self.state.refreshes.lock().extend(refreshes);
        self.state.merges.lock().extend(merges);
        self.state.commits_applied.fetch_add(1, Ordering::SeqCst);
        model.mark_saved();
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_disconnect.load(Ordering::SeqCst) {
            return Err(Error::Engine("disconnect failed".to_string()));
        }
        Ok(())
    }
}
