//! Template partition lookup
//!
//! New partitions are cloned from a template partition of the same table.
//! The conventional template is the partition named after its table.

use crate::engine::{Partition, Table};

/// Finds the partition new partitions are cloned from.
pub trait TemplateLocator: Send + Sync {
    fn locate<'t>(&self, table: &'t Table) -> Option<&'t Partition>;
}

/// Template is the partition whose name equals the table name.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableNamedTemplate;

impl TemplateLocator for TableNamedTemplate {
    fn locate<'t>(&self, table: &'t Table) -> Option<&'t Partition> {
        table.find_partition(&table.name)
    }
}

/// Template is an explicitly named partition, the same for every table.
#[derive(Debug, Clone)]
pub struct ExplicitTemplate {
    partition_name: String,
}

impl ExplicitTemplate {
    pub fn new(partition_name: impl Into<String>) -> Self {
        Self {
            partition_name: partition_name.into(),
        }
    }
}

impl TemplateLocator for ExplicitTemplate {
    fn locate<'t>(&self, table: &'t Table) -> Option<&'t Partition> {
        table.find_partition(&self.partition_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locators() {
        let table = Table::new("Orders")
            .with_partition(Partition::query("Orders", "SELECT 1"))
            .with_partition(Partition::query("template", "SELECT 2"));

        assert_eq!(TableNamedTemplate.locate(&table).unwrap().name, "Orders");
        assert_eq!(
            ExplicitTemplate::new("TEMPLATE").locate(&table).unwrap().name,
            "template"
        );
        assert!(TableNamedTemplate.locate(&Table::new("Empty")).is_none());
    }
}
