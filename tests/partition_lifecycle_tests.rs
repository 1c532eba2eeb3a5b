//! Tests for the partition lifecycle manager
//!
//! Creation, replacement, merge, existence checks, and refreshes against the
//! in-memory engine, including failure paths and session release.

mod common;

use common::{assert_sessions_released, manager, manager_with_retries, sales_engine, DATABASE};
use std::sync::Arc;
use tabulon::engine::{Partition, RefreshScope, RefreshTarget, Table};
use tabulon::lifecycle::{ExplicitTemplate, PartitionSpec};
use tabulon::Error;

fn spec(partition: &str) -> PartitionSpec {
    PartitionSpec::new(
        "Orders",
        partition,
        format!("SELECT * FROM dbo.Orders WHERE month = {}", partition),
    )
}

// =========================================================================
// Creation
// =========================================================================

#[tokio::test]
async fn test_create_partitions_skips_existing() {
    let engine = sales_engine();
    let manager = manager(&engine);

    let outcome = manager
        .create_partitions("Orders", &[spec("202401"), spec("202403"), spec("202404")])
        .await
        .unwrap();

    assert_eq!(outcome.created, vec!["202403", "202404"]);
    assert_eq!(outcome.skipped, vec!["202401"]);
    assert!(!outcome.template_missing);
    assert_eq!(engine.commits_applied(), 1, "batch commits once");

    let created = engine.table(DATABASE, "Orders").unwrap();
    let partition = created.find_partition("202403").unwrap();
    assert_eq!(
        partition.source.source_text(),
        Some("SELECT * FROM dbo.Orders WHERE month = 202403")
    );
    assert_sessions_released(&engine);
}

#[tokio::test]
async fn test_create_partitions_is_idempotent() {
    let engine = sales_engine();
    let manager = manager(&engine);
    let specs = [spec("202403")];

    manager.create_partitions("Orders", &specs).await.unwrap();
    let before = engine.partition_names(DATABASE, "Orders");
    let second = manager.create_partitions("Orders", &specs).await.unwrap();

    assert!(second.created.is_empty());
    assert_eq!(engine.partition_names(DATABASE, "Orders"), before);
    assert_eq!(engine.commits_applied(), 1, "nothing to commit the second time");
}

#[tokio::test]
async fn test_create_partitions_without_template_is_noop() {
    let engine = sales_engine();
    engine.insert_table(
        DATABASE,
        Table::new("Returns").with_partition(Partition::query("202401", "SELECT 1")),
    );
    let manager = manager(&engine);

    let outcome = manager
        .create_partitions("Returns", &[spec("202402")])
        .await
        .unwrap();

    assert!(outcome.template_missing);
    assert!(outcome.created.is_empty());
    assert_eq!(engine.partition_names(DATABASE, "Returns"), vec!["202401"]);
    assert_eq!(engine.commit_attempts(), 0);
    assert_sessions_released(&engine);
}

#[tokio::test]
async fn test_create_partitions_unknown_table_or_empty_input() {
    let engine = sales_engine();
    let manager = manager(&engine);

    let outcome = manager.create_partitions("Nope", &[spec("202401")]).await.unwrap();
    assert!(outcome.created.is_empty() && !outcome.template_missing);

    let outcome = manager.create_partitions("Orders", &[]).await.unwrap();
    assert!(outcome.created.is_empty());

    let outcome = manager.create_partitions("  ", &[spec("202401")]).await.unwrap();
    assert!(outcome.created.is_empty());
    assert_eq!(engine.commit_attempts(), 0);
}

#[tokio::test]
async fn test_explicit_template_locator() {
    let engine = sales_engine();
    engine.insert_table(
        DATABASE,
        Table::new("Returns").with_partition(Partition::expression("template", "let x = 1 in x")),
    );
    let manager = manager(&engine).with_template_locator(Arc::new(ExplicitTemplate::new("template")));

    let spec = PartitionSpec::new("Returns", "202401", "let x = 202401 in x");
    let outcome = manager.create_partitions("Returns", &[spec]).await.unwrap();

    assert_eq!(outcome.created, vec!["202401"]);
    let table = engine.table(DATABASE, "Returns").unwrap();
    assert_eq!(
        table.find_partition("202401").unwrap().source.source_text(),
        Some("let x = 202401 in x")
    );
}

#[tokio::test]
async fn test_create_new_partition_replace() {
    let engine = sales_engine();
    let manager = manager(&engine);
    let replacement = PartitionSpec::new("Orders", "202401", "SELECT 'replaced'");

    let created = manager.create_new_partition(&replacement, false).await.unwrap();
    assert!(!created, "existing partition is kept without replace");

    let created = manager.create_new_partition(&replacement, true).await.unwrap();
    assert!(created);
    let table = engine.table(DATABASE, "Orders").unwrap();
    assert_eq!(
        table.find_partition("202401").unwrap().source.source_text(),
        Some("SELECT 'replaced'")
    );
    assert_eq!(engine.commits_applied(), 2, "remove and add commit separately");
    assert_sessions_released(&engine);
}

#[tokio::test]
async fn test_replace_without_template_keeps_existing() {
    let engine = sales_engine();
    engine.insert_table(
        DATABASE,
        Table::new("Returns").with_partition(Partition::query("202401", "SELECT 1")),
    );
    let manager = manager(&engine);

    let spec = PartitionSpec::new("Returns", "202401", "SELECT 2");
    assert!(!manager.create_new_partition(&spec, true).await.unwrap());
    assert_eq!(engine.partition_names(DATABASE, "Returns"), vec!["202401"]);
}

// =========================================================================
// Merge
// =========================================================================

#[tokio::test]
async fn test_merge_creates_target_and_merges_sources() {
    let engine = sales_engine();
    let manager = manager(&engine);
    let target = PartitionSpec::new("Orders", "2024", "SELECT * FROM dbo.Orders WHERE y = 2024");
    let sources = vec!["202401".to_string(), "202402".to_string(), "209912".to_string()];

    let outcome = manager
        .merge_partitions("Orders", Some(&target), &sources)
        .await
        .unwrap();

    assert!(outcome.target_created);
    assert_eq!(outcome.merged, vec!["202401", "202402"]);
    assert_eq!(engine.partition_names(DATABASE, "Orders"), vec!["Orders", "2024"]);
    let merged = engine.table(DATABASE, "Orders").unwrap();
    assert_eq!(
        merged.find_partition("2024").unwrap().merged_from,
        vec!["202401", "202402"]
    );
    assert_eq!(engine.merges().len(), 1);
    assert_sessions_released(&engine);
}

#[tokio::test]
async fn test_merge_with_no_resolvable_sources_commits_nothing() {
    let engine = sales_engine();
    let manager = manager(&engine);
    let target = PartitionSpec::new("Orders", "202401", "");

    let outcome = manager
        .merge_partitions("Orders", Some(&target), &["199901".to_string()])
        .await
        .unwrap();

    assert!(outcome.merged.is_empty());
    assert!(!outcome.target_created);
    assert!(engine.merges().is_empty());
    assert_eq!(engine.commit_attempts(), 0);
}

#[tokio::test]
async fn test_merge_without_target_is_noop() {
    let engine = sales_engine();
    let manager = manager(&engine);

    let outcome = manager
        .merge_partitions("Orders", None, &["202401".to_string()])
        .await
        .unwrap();
    assert!(outcome.merged.is_empty());
    assert_eq!(engine.connect_count(), 0);
}

// =========================================================================
// Existence and refresh
// =========================================================================

#[tokio::test]
async fn test_partition_exists() {
    let engine = sales_engine();
    let manager = manager(&engine);

    assert!(manager.partition_exists("Orders", "202401").await.unwrap());
    assert!(manager.partition_exists("orders", "202401").await.unwrap());
    assert!(!manager.partition_exists("Orders", "209901").await.unwrap());
    assert!(!manager.partition_exists("Nope", "202401").await.unwrap());
    assert_sessions_released(&engine);
}

#[tokio::test]
async fn test_process_model_full() {
    let engine = sales_engine();
    manager(&engine).process_model_full().await.unwrap();

    let refreshes = engine.refreshes();
    assert_eq!(refreshes.len(), 1);
    assert_eq!(refreshes[0].target, RefreshTarget::Model);
    assert_eq!(refreshes[0].scope, RefreshScope::Full);
}

#[tokio::test]
async fn test_process_table_missing_is_skipped() {
    let engine = sales_engine();
    let manager = manager(&engine);

    assert!(!manager.process_table("Nope", RefreshScope::Full).await.unwrap());
    assert!(!manager.process_table("", RefreshScope::Full).await.unwrap());
    assert!(manager.process_table("Orders", RefreshScope::DataOnly).await.unwrap());

    let refreshes = engine.refreshes();
    assert_eq!(refreshes.len(), 1);
    assert_eq!(refreshes[0].target, RefreshTarget::Table("Orders".to_string()));
    assert_eq!(refreshes[0].scope, RefreshScope::DataOnly);
}

#[tokio::test]
async fn test_process_tables_trims_and_skips_unknown() {
    let engine = sales_engine();
    let names: Vec<String> = " Orders,Nope , Customers"
        .split(',')
        .map(str::to_string)
        .collect();

    let refreshed = manager(&engine)
        .process_tables(&names, RefreshScope::Full)
        .await
        .unwrap();

    assert_eq!(refreshed, 2);
    assert_eq!(engine.commits_applied(), 1);
    let targets: Vec<_> = engine.refreshes().into_iter().map(|r| r.target).collect();
    assert_eq!(
        targets,
        vec![
            RefreshTarget::Table("Orders".to_string()),
            RefreshTarget::Table("Customers".to_string())
        ]
    );
}

#[tokio::test]
async fn test_process_partitions_commits_once() {
    let engine = sales_engine();
    let partitions = vec!["202401".to_string(), "209901".to_string(), "202402".to_string()];

    let refreshed = manager(&engine)
        .process_partitions("Orders", &partitions, RefreshScope::Full)
        .await
        .unwrap();

    assert_eq!(refreshed, 2);
    assert_eq!(engine.commits_applied(), 1);
    assert_eq!(engine.refreshes().len(), 2);
}

#[tokio::test]
async fn test_process_partition_missing_is_skipped() {
    let engine = sales_engine();
    let refreshed = manager(&engine)
        .process_partition("Orders", "209901", RefreshScope::Full)
        .await
        .unwrap();
    assert!(!refreshed);
    assert_eq!(engine.commit_attempts(), 0);
}

#[tokio::test]
async fn test_process_table_by_partitions() {
    let engine = sales_engine();
    let manager = manager(&engine);

    let commits = manager
        .process_table_by_partitions("Orders", RefreshScope::Full)
        .await
        .unwrap();
    assert_eq!(commits, 3);
    assert_eq!(engine.commits_applied(), 3);

    let commits = manager
        .process_table_by_partitions("Audit", RefreshScope::Full)
        .await
        .unwrap();
    assert_eq!(commits, 1, "table without partitions is refreshed whole");
    assert_eq!(
        engine.refreshes().last().unwrap().target,
        RefreshTarget::Table("Audit".to_string())
    );
}

// =========================================================================
// Failure paths
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_transient_commit_failure_is_retried() {
    let engine = sales_engine();
    engine.fail_next_commits(2);

    manager_with_retries(&engine, 3)
        .process_table("Orders", RefreshScope::Full)
        .await
        .unwrap();

    assert_eq!(engine.commit_attempts(), 3);
    assert_eq!(engine.commits_applied(), 1);
    assert_sessions_released(&engine);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_surface_and_release_session() {
    let engine = sales_engine();
    engine.fail_next_commits(10);

    let err = manager_with_retries(&engine, 2)
        .create_partitions("Orders", &[spec("202405")])
        .await
        .unwrap_err();

    assert!(matches!(err, Error::SaveExhausted { attempts: 3, .. }));
    assert!(matches!(err.root(), Error::TransientCommit(_)));
    assert!(!engine.partition_names(DATABASE, "Orders").contains(&"202405".to_string()));
    assert_sessions_released(&engine);
}

#[tokio::test]
async fn test_unknown_database_is_not_found() {
    let engine = sales_engine();
    let err = manager(&engine)
        .for_database("Marketing")
        .process_model_full()
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert_sessions_released(&engine);
}

#[tokio::test]
async fn test_connect_failure_propagates() {
    let engine = sales_engine();
    engine.set_fail_connect(true);
    let err = manager(&engine).process_model_full().await.unwrap_err();
    assert!(matches!(err, Error::Engine(_)));
}

#[tokio::test]
async fn test_disconnect_failure_does_not_override_result() {
    let engine = sales_engine();
    engine.set_fail_disconnect(true);

    let refreshed = manager(&engine)
        .process_table("Orders", RefreshScope::Full)
        .await
        .unwrap();
    assert!(refreshed);
    assert_eq!(engine.disconnect_count(), 1);
}
