//! Per-table source query templates

use crate::{Error, Result};
use std::collections::HashMap;
use std::path::Path;

/// Example template for the AdventureWorks internet sales fact table.
const INTERNET_SALES_TEMPLATE: &str =
    "SELECT * FROM [dbo].[FactInternetSales] WHERE [OrderDateKey] >= {0} and [OrderDateKey] < {1}";

/// Source query templates keyed by table name (case-insensitive).
#[derive(Debug, Clone, Default)]
pub struct QueryTemplates {
    entries: HashMap<String, String>,
}

impl QueryTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in example templates.
    pub fn with_defaults() -> Self {
        let mut templates = Self::new();
        templates.insert("metrics-internet-sales", INTERNET_SALES_TEMPLATE);
        templates
    }

    /// Load templates from a JSON object of `{ "table": "template" }`.
    ///
    /// Loaded entries are layered over the built-in defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let entries: HashMap<String, String> = serde_json::from_str(&raw).map_err(|e| {
            Error::Config(format!(
                "invalid query template file {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut templates = Self::with_defaults();
        for (table, template) in entries {
            templates.insert(&table, template);
        }
        Ok(templates)
    }

    pub fn insert(&mut self, table_name: &str, template: impl Into<String>) {
        self.entries
            .insert(table_name.to_lowercase(), template.into());
    }

    pub fn get(&self, table_name: &str) -> Option<&str> {
        self.entries
            .get(&table_name.to_lowercase())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
