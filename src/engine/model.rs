//! Detached, change-tracking view of one tabular database
//!
//! A [`Model`] is loaded from an engine session, mutated locally, and
//! persisted with `EngineSession::save_changes`. Local mutations take effect
//! on the copy immediately and are recorded as [`ModelChange`]s that the
//! engine replays on commit.

use crate::{Error, Result};

/// Refresh scope requested for a model, table, or partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RefreshScope {
    /// Schema and data
    Full,
    /// Data only
    DataOnly,
}

impl RefreshScope {
    pub fn from_data_only(data_only: bool) -> Self {
        if data_only {
            Self::DataOnly
        } else {
            Self::Full
        }
    }
}

/// Object a refresh is requested on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshTarget {
    Model,
    Table(String),
    Partition { table: String, partition: String },
}

/// Where a partition reads its data from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionSource {
    /// Native query against a data source
    Query { query: String, data_source: String },
    /// Mashup (M) expression
    Expression { expression: String },
    /// Any other source kind (calculated, entity, ...). Never rewritten.
    Other { kind: String },
}

impl PartitionSource {
    /// Replace the query or expression. Returns false for unrecognized kinds.
    pub fn set_source_text(&mut self, text: &str) -> bool {
        match self {
            PartitionSource::Query { query, .. } => {
                *query = text.to_string();
                true
            }
            PartitionSource::Expression { expression } => {
                *expression = text.to_string();
                true
            }
            PartitionSource::Other { .. } => false,
        }
    }

    pub fn source_text(&self) -> Option<&str> {
        match self {
            PartitionSource::Query { query, .. } => Some(query),
            PartitionSource::Expression { expression } => Some(expression),
            PartitionSource::Other { .. } => None,
        }
    }
}

/// A named partition of a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub name: String,
    pub source: PartitionSource,
    /// Names of partitions the engine merged into this one
    pub merged_from: Vec<String>,
}

impl Partition {
    pub fn new(name: impl Into<String>, source: PartitionSource) -> Self {
        Self {
            name: name.into(),
            source,
            merged_from: Vec::new(),
        }
    }

    pub fn query(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self::new(
            name,
            PartitionSource::Query {
                query: query.into(),
                data_source: "default".to_string(),
            },
        )
    }

    pub fn expression(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::new(
            name,
            PartitionSource::Expression {
                expression: expression.into(),
            },
        )
    }

    /// Copy this definition into `target`, keeping the target's name.
    pub fn copy_to(&self, target: &mut Partition) {
        target.source = self.source.clone();
        target.merged_from.clear();
    }
}

/// A table and its partitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub name: String,
    pub partitions: Vec<Partition>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partitions: Vec::new(),
        }
    }

    pub fn with_partition(mut self, partition: Partition) -> Self {
        self.partitions.push(partition);
        self
    }

    /// Case-insensitive partition lookup, as the engine resolves names.
    pub fn find_partition(&self, name: &str) -> Option<&Partition> {
        self.partitions
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn find_partition_mut(&mut self, name: &str) -> Option<&mut Partition> {
        self.partitions
            .iter_mut()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn partition_names(&self) -> Vec<String> {
        self.partitions.iter().map(|p| p.name.clone()).collect()
    }
}

/// A pending structural or refresh change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelChange {
    AddPartition { table: String, partition: Partition },
    RemovePartition { table: String, partition: String },
    Refresh { target: RefreshTarget, scope: RefreshScope },
    Merge { table: String, target: String, sources: Vec<String> },
}

/// Local copy of a database's model plus its uncommitted changes
#[derive(Debug, Clone)]
pub struct Model {
    database: String,
    tables: Vec<Table>,
    pending: Vec<ModelChange>,
}

impl Model {
    pub fn new(database: impl Into<String>, tables: Vec<Table>) -> Self {
        Self {
            database: database.into(),
            tables,
            pending: Vec::new(),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn find_table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    fn find_table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .iter_mut()
            .find(|t| t.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::NotFound(format!("table {}", name)))
    }

    pub fn find_partition(&self, table: &str, partition: &str) -> Option<&Partition> {
        self.find_table(table)?.find_partition(partition)
    }

    pub fn add_partition(&mut self, table: &str, partition: Partition) -> Result<()> {
        let target = self.find_table_mut(table)?;
        if target.find_partition(&partition.name).is_some() {
            return Err(Error::Engine(format!(
                "partition {} already exists in table {}",
                partition.name, table
            )));
        }
        target.partitions.push(partition.clone());
        self.pending.push(ModelChange::AddPartition {
            table: table.to_string(),
            partition,
        });
        Ok(())
    }

    pub fn remove_partition(&mut self, table: &str, partition: &str) -> Result<Partition> {
        let target = self.find_table_mut(table)?;
        let index = target
            .partitions
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(partition))
            .ok_or_else(|| Error::NotFound(format!("partition {}/{}", table, partition)))?;
        let removed = target.partitions.remove(index);
        self.pending.push(ModelChange::RemovePartition {
            table: table.to_string(),
            partition: removed.name.clone(),
        });
        Ok(removed)
    }

    pub fn request_refresh(&mut self, target: RefreshTarget, scope: RefreshScope) -> Result<()> {
        match &target {
            RefreshTarget::Model => {}
            RefreshTarget::Table(table) => {
                self.find_table_mut(table)?;
            }
            RefreshTarget::Partition { table, partition } => {
                if self.find_partition(table, partition).is_none() {
                    return Err(Error::NotFound(format!("partition {}/{}", table, partition)));
                }
            }
        }
        self.pending.push(ModelChange::Refresh { target, scope });
        Ok(())
    }

    pub fn request_merge(&mut self, table: &str, target: &str, sources: Vec<String>) -> Result<()> {
        if self.find_partition(table, target).is_none() {
            return Err(Error::NotFound(format!("partition {}/{}", table, target)));
        }
        self.pending.push(ModelChange::Merge {
            table: table.to_string(),
            target: target.to_string(),
            sources,
        });
        Ok(())
    }

    pub fn pending_changes(&self) -> &[ModelChange] {
        &self.pending
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Called by engine sessions once the pending changes are persisted.
    pub fn mark_saved(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> Model {
        Model::new(
            "Sales",
            vec![Table::new("Orders").with_partition(Partition::query("Orders", "SELECT 1"))],
        )
    }

    #[test]
    fn test_add_partition_tracks_change() {
        let mut model = model();
        model
            .add_partition("orders", Partition::query("202401", "SELECT 2"))
            .unwrap();
        assert!(model.find_partition("Orders", "202401").is_some());
        assert_eq!(model.pending_changes().len(), 1);

        let err = model
            .add_partition("Orders", Partition::query("202401", "SELECT 3"))
            .unwrap_err();
        assert!(matches!(err, Error::Engine(_)));
    }

    #[test]
    fn test_refresh_on_missing_partition_is_not_found() {
        let mut model = model();
        let err = model
            .request_refresh(
                RefreshTarget::Partition {
                    table: "Orders".into(),
                    partition: "nope".into(),
                },
                RefreshScope::Full,
            )
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!model.has_pending_changes());
    }

    #[test]
    fn test_set_source_text_by_kind() {
        let mut query = PartitionSource::Query {
            query: "a".into(),
            data_source: "ds".into(),
        };
        let mut expr = PartitionSource::Expression {
            expression: "b".into(),
        };
        let mut other = PartitionSource::Other {
            kind: "calculated".into(),
        };
        assert!(query.set_source_text("q2"));
        assert!(expr.set_source_text("e2"));
        assert!(!other.set_source_text("ignored"));
        assert_eq!(query.source_text(), Some("q2"));
        assert_eq!(expr.source_text(), Some("e2"));
        assert_eq!(other.source_text(), None);
    }

    #[test]
    fn test_copy_to_keeps_target_name() {
        let template = Partition::expression("Orders", "let x = 1 in x");
        let mut target = Partition::query("202402", "old");
        target.merged_from.push("stale".into());
        template.copy_to(&mut target);
        assert_eq!(target.name, "202402");
        assert_eq!(target.source, template.source);
        assert!(target.merged_from.is_empty());
    }
}
