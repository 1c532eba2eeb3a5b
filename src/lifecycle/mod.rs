//! Partition lifecycle manager
//!
//! Creates, replaces, merges, and refreshes partitions of one tabular
//! database. Every operation follows the same shape:
//!
//! 1. connect and load the model
//! 2. resolve table and partitions; missing objects are skipped, not errors
//! 3. mutate the local model
//! 4. commit through the [`SaveOrchestrator`]
//! 5. disconnect, on every exit path
//!
//! The manager keeps no state between calls and knows nothing about job tracking.

mod template;

pub use template::{ExplicitTemplate, TableNamedTemplate, TemplateLocator};

use crate::engine::{
    EngineSession, Model, Partition, PartitionSource, RefreshScope, RefreshTarget, TabularEngine,
};
use crate::retry::{Commit, SaveOrchestrator};
use crate::{EngineSettings, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A partition to create, or the target of a merge
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PartitionSpec {
    #[serde(default)]
    pub table_name: String,
    pub partition_name: String,
    #[serde(default)]
    pub source_query: String,
}

impl PartitionSpec {
    pub fn new(
        table_name: impl Into<String>,
        partition_name: impl Into<String>,
        source_query: impl Into<String>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            partition_name: partition_name.into(),
            source_query: source_query.into(),
        }
    }
}

/// Merge of source partitions into a target partition
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MergeSpec {
    #[serde(default)]
    pub table_name: String,
    pub target_partition: Option<PartitionSpec>,
    #[serde(default)]
    pub source_partition_names: Vec<String>,
}

/// Result of a batch partition creation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOutcome {
    pub created: Vec<String>,
    /// Partitions that already existed
    pub skipped: Vec<String>,
    /// No template partition was found; nothing was created
    pub template_missing: bool,
}

/// Result of a merge request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Target partition had to be created first
    pub target_created: bool,
    /// Source partitions merged into the target
    pub merged: Vec<String>,
}

/// An open session plus the model loaded through it
struct Connection {
    session: Box<dyn EngineSession>,
    model: Model,
}

#[async_trait]
impl Commit for Connection {
    async fn commit(&mut self) -> Result<()> {
        self.session.save_changes(&mut self.model).await
    }
}

/// Partition lifecycle operations against one database
#[derive(Clone)]
pub struct PartitionManager {
    engine: Arc<dyn TabularEngine>,
    settings: EngineSettings,
    saver: SaveOrchestrator,
    templates: Arc<dyn TemplateLocator>,
}

impl PartitionManager {
    pub fn new(
        engine: Arc<dyn TabularEngine>,
        settings: EngineSettings,
        saver: SaveOrchestrator,
    ) -> Self {
        Self {
            engine,
            settings,
            saver,
            templates: Arc::new(TableNamedTemplate),
        }
    }

    /// Replace the template lookup strategy.
    pub fn with_template_locator(mut self, templates: Arc<dyn TemplateLocator>) -> Self {
        self.templates = templates;
        self
    }

    /// Same manager bound to `database`.
    pub fn for_database(&self, database: &str) -> Self {
        let mut manager = self.clone();
        manager.settings.database = database.to_string();
        manager
    }

    pub fn database(&self) -> &str {
        &self.settings.database
    }

    async fn open(&self) -> Result<Connection> {
        let mut session = self
            .engine
            .connect(&self.settings.connection_string)
            .await?;
        match session.open_model(&self.settings.database).await {
            Ok(model) => Ok(Connection { session, model }),
            Err(e) => {
                disconnect(session.as_mut(), &self.settings.database).await;
                Err(e)
            }
        }
    }

    async fn release(&self, mut conn: Connection) {
        disconnect(conn.session.as_mut(), &self.settings.database).await;
    }

    // ── Partition creation ──────────────────────────────────────────

    /// Create every partition in `specs` that does not already exist in `table`.
    ///
    /// Commits once, and only if at least one partition was added.
    pub async fn create_partitions(
        &self,
        table: &str,
        specs: &[PartitionSpec],
    ) -> Result<CreateOutcome> {
        if table.trim().is_empty() || specs.is_empty() {
            return Ok(CreateOutcome::default());
        }

        let mut conn = self.open().await?;
        let result = self.create_partitions_in(&mut conn, table, specs).await;
        self.release(conn).await;

        if let Ok(outcome) = &result {
            info!(
                database = %self.settings.database,
                table,
                created = outcome.created.len(),
                skipped = outcome.skipped.len(),
                template_missing = outcome.template_missing,
                "Created partitions"
            );
        }
        result
    }

    async fn create_partitions_in(
        &self,
        conn: &mut Connection,
        table: &str,
        specs: &[PartitionSpec],
    ) -> Result<CreateOutcome> {
        let mut outcome = CreateOutcome::default();

        let Some(table_def) = conn.model.find_table(table) else {
            debug!(table, "Table not found, skipping partition creation");
            return Ok(outcome);
        };
        let Some(template) = self.templates.locate(table_def).cloned() else {
            warn!(table, "No template partition found, skipping partition creation");
            outcome.template_missing = true;
            return Ok(outcome);
        };

        for spec in specs {
            if conn.model.find_partition(table, &spec.partition_name).is_some() {
                outcome.skipped.push(spec.partition_name.clone());
                continue;
            }
            conn.model
                .add_partition(table, clone_template(&template, spec))?;
            outcome.created.push(spec.partition_name.clone());
        }

        if !outcome.created.is_empty() {
            self.saver.save_with_retry(conn).await?;
        }
        Ok(outcome)
    }

    /// Create one partition, optionally replacing an existing one of the same name.
    ///
    /// Returns whether a partition was created.
    pub async fn create_new_partition(
        &self,
        spec: &PartitionSpec,
        replace_existing: bool,
    ) -> Result<bool> {
        if spec.table_name.trim().is_empty() || spec.partition_name.trim().is_empty() {
            return Ok(false);
        }

        let mut conn = self.open().await?;
        let result = self
            .create_new_partition_in(&mut conn, spec, replace_existing)
            .await;
        self.release(conn).await;
        result
    }

    async fn create_new_partition_in(
        &self,
        conn: &mut Connection,
        spec: &PartitionSpec,
        replace_existing: bool,
    ) -> Result<bool> {
        let table = spec.table_name.as_str();
        let Some(table_def) = conn.model.find_table(table) else {
            debug!(table, "Table not found, skipping partition creation");
            return Ok(false);
        };
        let Some(template) = self.templates.locate(table_def).cloned() else {
            warn!(table, partition = %spec.partition_name, "No template partition found");
            return Ok(false);
        };

        let mut exists = conn.model.find_partition(table, &spec.partition_name).is_some();
        if replace_existing && exists {
            conn.model.remove_partition(table, &spec.partition_name)?;
            self.saver.save_with_retry(conn).await?;
            info!(table, partition = %spec.partition_name, "Removed partition for replacement");
            exists = false;
        }

        if exists {
            return Ok(false);
        }

        conn.model
            .add_partition(table, clone_template(&template, spec))?;
        self.saver.save_with_retry(conn).await?;
        info!(
            database = %self.settings.database,
            table,
            partition = %spec.partition_name,
            "Created partition"
        );
        Ok(true)
    }

    // ── Merge ───────────────────────────────────────────────────────

    /// Merge `sources` into `target`, creating the target first if needed.
    ///
    /// Sources that do not exist are dropped. With no resolvable source no
    /// merge is committed, even when the target was just created.
    pub async fn merge_partitions(
        &self,
        table: &str,
        target: Option<&PartitionSpec>,
        sources: &[String],
    ) -> Result<MergeOutcome> {
        let Some(target) = target else {
            return Ok(MergeOutcome::default());
        };
        if table.trim().is_empty() || sources.is_empty() {
            return Ok(MergeOutcome::default());
        }

        let mut outcome = MergeOutcome::default();
        let mut conn = self.open().await?;

        let target_state = match conn.model.find_table(table) {
            None => None,
            Some(t) => Some(t.find_partition(&target.partition_name).is_some()),
        };

        match target_state {
            None => {
                debug!(table, "Table not found, skipping merge");
                self.release(conn).await;
                return Ok(outcome);
            }
            Some(true) => {}
            Some(false) => {
                // The target is created on its own connection; reconnect so the
                // session sees the structural change.
                self.release(conn).await;
                let mut spec = target.clone();
                if spec.table_name.trim().is_empty() {
                    spec.table_name = table.to_string();
                }
                outcome.target_created = self.create_new_partition(&spec, false).await?;
                conn = self.open().await?;
            }
        }

        let result = self
            .merge_partitions_in(&mut conn, table, &target.partition_name, sources)
            .await;
        self.release(conn).await;

        outcome.merged = result?;
        info!(
            database = %self.settings.database,
            table,
            target = %target.partition_name,
            target_created = outcome.target_created,
            merged = outcome.merged.len(),
            "Merge request processed"
        );
        Ok(outcome)
    }

    async fn merge_partitions_in(
        &self,
        conn: &mut Connection,
        table: &str,
        target: &str,
        sources: &[String],
    ) -> Result<Vec<String>> {
        let Some(table_def) = conn.model.find_table(table) else {
            return Ok(Vec::new());
        };
        if table_def.find_partition(target).is_none() {
            warn!(table, target, "Merge target not found after creation");
            return Ok(Vec::new());
        }

        let mut resolved: Vec<String> = Vec::new();
        for name in sources {
            match table_def.find_partition(name) {
                Some(p) if !resolved.iter().any(|r| r.eq_ignore_ascii_case(&p.name)) => {
                    resolved.push(p.name.clone())
                }
                Some(_) => {}
                None => debug!(table, partition = %name, "Merge source not found, dropping"),
            }
        }

        if resolved.is_empty() {
            return Ok(resolved);
        }

        conn.model.request_merge(table, target, resolved.clone())?;
        self.saver.save_with_retry(conn).await?;
        Ok(resolved)
    }

    /// Whether `partition` exists in `table`.
    pub async fn partition_exists(&self, table: &str, partition: &str) -> Result<bool> {
        let conn = self.open().await?;
        let exists = conn.model.find_partition(table, partition).is_some();
        self.release(conn).await;
        Ok(exists)
    }

    // ── Refresh ─────────────────────────────────────────────────────

    /// Full refresh of the whole model.
    pub async fn process_model_full(&self) -> Result<()> {
        let mut conn = self.open().await?;
        let result = self
            .refresh_and_commit(&mut conn, RefreshTarget::Model, RefreshScope::Full)
            .await;
        self.release(conn).await;
        result?;
        info!(database = %self.settings.database, "Model refresh committed");
        Ok(())
    }

    /// Refresh one table. Returns false if the table does not exist.
    pub async fn process_table(&self, table: &str, scope: RefreshScope) -> Result<bool> {
        if table.trim().is_empty() {
            return Ok(false);
        }

        let mut conn = self.open().await?;
        let result = if conn.model.find_table(table).is_some() {
            self.refresh_and_commit(&mut conn, RefreshTarget::Table(table.to_string()), scope)
                .await
                .map(|_| true)
        } else {
            debug!(table, "Table not found, skipping refresh");
            Ok(false)
        };
        self.release(conn).await;

        if let Ok(true) = result {
            info!(database = %self.settings.database, table, ?scope, "Table refresh committed");
        }
        result
    }

    /// Refresh several tables with one commit. Returns the number refreshed.
    pub async fn process_tables(&self, tables: &[String], scope: RefreshScope) -> Result<usize> {
        if tables.is_empty() {
            return Ok(0);
        }

        let mut conn = self.open().await?;
        let result = self.process_tables_in(&mut conn, tables, scope).await;
        self.release(conn).await;

        if let Ok(count) = result {
            info!(database = %self.settings.database, requested = tables.len(), refreshed = count, "Tables refresh processed");
        }
        result
    }

    async fn process_tables_in(
        &self,
        conn: &mut Connection,
        tables: &[String],
        scope: RefreshScope,
    ) -> Result<usize> {
        let mut marked = 0;
        for name in tables.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
            if conn.model.find_table(name).is_none() {
                debug!(table = name, "Table not found, skipping refresh");
                continue;
            }
            conn.model
                .request_refresh(RefreshTarget::Table(name.to_string()), scope)?;
            marked += 1;
        }

        if marked > 0 {
            self.saver.save_with_retry(conn).await?;
        }
        Ok(marked)
    }

    /// Refresh one partition. Returns false if the table or partition does not exist.
    pub async fn process_partition(
        &self,
        table: &str,
        partition: &str,
        scope: RefreshScope,
    ) -> Result<bool> {
        if table.trim().is_empty() {
            return Ok(false);
        }
        let count = self
            .process_partitions(table, &[partition.to_string()], scope)
            .await?;
        Ok(count > 0)
    }

    /// Refresh several partitions of a table with one commit. Returns the number refreshed.
    pub async fn process_partitions(
        &self,
        table: &str,
        partitions: &[String],
        scope: RefreshScope,
    ) -> Result<usize> {
        if table.trim().is_empty() || partitions.is_empty() {
            return Ok(0);
        }

        let mut conn = self.open().await?;
        let result = self
            .process_partitions_in(&mut conn, table, partitions, scope)
            .await;
        self.release(conn).await;

        if let Ok(count) = result {
            info!(database = %self.settings.database, table, refreshed = count, ?scope, "Partition refresh processed");
        }
        result
    }

    async fn process_partitions_in(
        &self,
        conn: &mut Connection,
        table: &str,
        partitions: &[String],
        scope: RefreshScope,
    ) -> Result<usize> {
        let mut marked = 0;
        for name in partitions {
            let Some(partition) = conn.model.find_partition(table, name) else {
                debug!(table, partition = %name, "Partition not found, skipping refresh");
                continue;
            };
            let target = RefreshTarget::Partition {
                table: table.to_string(),
                partition: partition.name.clone(),
            };
            conn.model.request_refresh(target, scope)?;
            marked += 1;
        }

        if marked > 0 {
            self.saver.save_with_retry(conn).await?;
        }
        Ok(marked)
    }

    /// Refresh a table one partition at a time, committing after each.
    ///
    /// Tables without partitions get a whole-table refresh. Returns the
    /// number of refresh commits.
    pub async fn process_table_by_partitions(
        &self,
        table: &str,
        scope: RefreshScope,
    ) -> Result<usize> {
        if table.trim().is_empty() {
            return Ok(0);
        }

        let mut conn = self.open().await?;
        let result = self.process_table_by_partitions_in(&mut conn, table, scope).await;
        self.release(conn).await;
        result
    }

    async fn process_table_by_partitions_in(
        &self,
        conn: &mut Connection,
        table: &str,
        scope: RefreshScope,
    ) -> Result<usize> {
        let Some(table_def) = conn.model.find_table(table) else {
            debug!(table, "Table not found, skipping refresh");
            return Ok(0);
        };
        let partitions = table_def.partition_names();

        if partitions.is_empty() {
            self.refresh_and_commit(conn, RefreshTarget::Table(table.to_string()), scope)
                .await?;
            return Ok(1);
        }

        for partition in &partitions {
            let target = RefreshTarget::Partition {
                table: table.to_string(),
                partition: partition.clone(),
            };
            self.refresh_and_commit(conn, target, scope).await?;
            debug!(table, partition = %partition, "Partition refresh committed");
        }
        Ok(partitions.len())
    }

    async fn refresh_and_commit(
        &self,
        conn: &mut Connection,
        target: RefreshTarget,
        scope: RefreshScope,
    ) -> Result<()> {
        conn.model.request_refresh(target, scope)?;
        self.saver.save_with_retry(conn).await
    }
}

async fn disconnect(session: &mut dyn EngineSession, database: &str) {
    if let Err(e) = session.disconnect().await {
        warn!(database, error = %e, "Engine disconnect failed");
    }
}

/// New partition cloned from `template`, named and sourced from `spec`.
fn clone_template(template: &Partition, spec: &PartitionSpec) -> Partition {
    let mut partition = Partition::new(
        spec.partition_name.clone(),
        PartitionSource::Other {
            kind: String::new(),
        },
    );
    template.copy_to(&mut partition);
    if !partition.source.set_source_text(&spec.source_query) {
        debug!(
            partition = %spec.partition_name,
            "Template source kind not rewritable, keeping template source"
        );
    }
    partition
}
