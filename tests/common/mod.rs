//! Shared fixtures for Tabulon integration tests

#![allow(dead_code)]

use std::sync::Arc;
use tabulon::engine::{InMemoryEngine, Partition, Table};
use tabulon::lifecycle::PartitionManager;
use tabulon::retry::{RetryPolicy, SaveOrchestrator, WaitPattern};
use tabulon::EngineSettings;

pub const DATABASE: &str = "Sales";

/// `Sales` with an `Orders` table holding its template plus two monthly
/// partitions, a `Customers` table holding only its template, and an `Audit`
/// table without partitions.
pub fn sales_engine() -> InMemoryEngine {
    let engine = InMemoryEngine::new();
    engine.insert_database(
        DATABASE,
        vec![
            Table::new("Orders")
                .with_partition(Partition::query("Orders", "SELECT * FROM dbo.Orders"))
                .with_partition(Partition::query(
                    "202401",
                    "SELECT * FROM dbo.Orders WHERE k >= 20240101 AND k < 20240131",
                ))
                .with_partition(Partition::query(
                    "202402",
                    "SELECT * FROM dbo.Orders WHERE k >= 20240201 AND k < 20240229",
                )),
            Table::new("Customers")
                .with_partition(Partition::query("Customers", "SELECT * FROM dbo.Customers")),
            Table::new("Audit"),
        ],
    );
    engine
}

pub fn settings() -> EngineSettings {
    EngineSettings {
        database: DATABASE.to_string(),
        ..Default::default()
    }
}

pub fn manager(engine: &InMemoryEngine) -> PartitionManager {
    manager_with_retries(engine, 0)
}

/// Manager retrying commits `max_retries` times, one second apart.
pub fn manager_with_retries(engine: &InMemoryEngine, max_retries: u32) -> PartitionManager {
    PartitionManager::new(
        Arc::new(engine.clone()),
        settings(),
        SaveOrchestrator::new(RetryPolicy::new(max_retries, WaitPattern::Equal, 1)),
    )
}

/// Every connect was matched by a disconnect.
pub fn assert_sessions_released(engine: &InMemoryEngine) {
    assert_eq!(
        engine.connect_count(),
        engine.disconnect_count(),
        "every engine session should be disconnected"
    );
}
