//! Partition structure endpoints: existence, creation, merge, repartition

use super::{ApiResult, ApiState, ResultMessage};
use crate::lifecycle::{MergeSpec, PartitionSpec};
use crate::planner::{parse_count, parse_target_date};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ExistsResponse {
    pub database: String,
    pub table: String,
    pub partition: String,
    pub exists: bool,
}

#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    pub result: String,
    pub created: Vec<String>,
    pub skipped: Vec<String>,
    pub template_missing: bool,
}

pub async fn partition_exists(
    State(state): State<ApiState>,
    Path((database, table, partition)): Path<(String, String, String)>,
) -> ApiResult<Json<ExistsResponse>> {
    let exists = state
        .manager
        .for_database(&database)
        .partition_exists(&table, &partition)
        .await?;
    Ok(Json(ExistsResponse {
        database,
        table,
        partition,
        exists,
    }))
}

/// Body: JSON array of partition specs. A spec without a table name takes the route's table.
pub async fn create_partitions(
    State(state): State<ApiState>,
    Path((database, table)): Path<(String, String)>,
    payload: Result<Json<Vec<PartitionSpec>>, JsonRejection>,
) -> ApiResult<Json<CreatedResponse>> {
    let Json(mut specs) = payload?;
    for spec in specs.iter_mut() {
        if spec.table_name.trim().is_empty() {
            spec.table_name = table.clone();
        }
    }

    let outcome = state
        .manager
        .for_database(&database)
        .create_partitions(&table, &specs)
        .await?;
    Ok(Json(CreatedResponse {
        result: format!("Created partitions on {}/{}", database, table),
        created: outcome.created,
        skipped: outcome.skipped,
        template_missing: outcome.template_missing,
    }))
}

/// Body: a merge spec. The route's table wins over the body's.
pub async fn merge_partitions(
    State(state): State<ApiState>,
    Path((database, table)): Path<(String, String)>,
    payload: Result<Json<MergeSpec>, JsonRejection>,
) -> ApiResult<Json<ResultMessage>> {
    let Json(spec) = payload?;
    let outcome = state
        .manager
        .for_database(&database)
        .merge_partitions(
            &table,
            spec.target_partition.as_ref(),
            &spec.source_partition_names,
        )
        .await?;
    Ok(Json(
        ResultMessage::new(format!(
            "Merged specified partitions in: {}/{}",
            database, table
        ))
        .with_count(outcome.merged.len()),
    ))
}

pub async fn repartition(
    State(state): State<ApiState>,
    Path((database, table, count)): Path<(String, String, String)>,
) -> ApiResult<Json<CreatedResponse>> {
    run_repartition(state, database, table, count, None).await
}

pub async fn repartition_by_date(
    State(state): State<ApiState>,
    Path((database, table, count, date)): Path<(String, String, String, String)>,
) -> ApiResult<Json<CreatedResponse>> {
    run_repartition(state, database, table, count, Some(date)).await
}

async fn run_repartition(
    state: ApiState,
    database: String,
    table: String,
    count: String,
    date: Option<String>,
) -> ApiResult<Json<CreatedResponse>> {
    let report = state
        .planner
        .for_database(&database)
        .repartition_monthly(
            &table,
            date.as_deref().and_then(parse_target_date),
            parse_count(&count),
        )
        .await?;
    Ok(Json(CreatedResponse {
        result: format!(
            "Repartitioned {}/{} with {} partitions from {}",
            database, table, report.count, report.target_date
        ),
        created: report.outcome.created,
        skipped: report.outcome.skipped,
        template_missing: report.outcome.template_missing,
    }))
}
