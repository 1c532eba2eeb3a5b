//! Refresh endpoints
//!
//! Synchronous routes call the partition manager and answer when the refresh
//! has been committed. `/async` routes queue a job and answer with its
//! tracking info.

use super::{ApiError, ApiResult, ApiState, ResultMessage};
use crate::engine::RefreshScope;
use crate::jobs::ProcessingTrackingInfo;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

/// Query options of the synchronous refresh routes
#[derive(Debug, Default, Deserialize)]
pub struct ProcessOptions {
    /// Reload data only, without recalculation
    #[serde(default, alias = "dataOnly")]
    pub data_only: bool,
}

impl ProcessOptions {
    fn scope(&self) -> RefreshScope {
        RefreshScope::from_data_only(self.data_only)
    }
}

pub async fn process_model(
    State(state): State<ApiState>,
    Path(database): Path<String>,
) -> ApiResult<Json<ResultMessage>> {
    state.manager.for_database(&database).process_model_full().await?;
    Ok(Json(ResultMessage::new(format!(
        "Processed tabular model: {}",
        database
    ))))
}

pub async fn process_model_async(
    State(state): State<ApiState>,
    Path(database): Path<String>,
) -> ApiResult<Json<ProcessingTrackingInfo>> {
    Ok(Json(state.pipeline.submit_model(&database).await?))
}

/// `tables` is a single table or a comma separated list.
pub async fn process_tables(
    State(state): State<ApiState>,
    Path((database, tables)): Path<(String, String)>,
    Query(options): Query<ProcessOptions>,
) -> ApiResult<Json<ResultMessage>> {
    let manager = state.manager.for_database(&database);
    let refreshed = if tables.contains(',') {
        let names: Vec<String> = tables.split(',').map(str::to_string).collect();
        manager.process_tables(&names, options.scope()).await?
    } else {
        usize::from(manager.process_table(&tables, options.scope()).await?)
    };
    Ok(Json(
        ResultMessage::new(format!("Processed tables: {}/{}", database, tables))
            .with_count(refreshed),
    ))
}

pub async fn process_table_async(
    State(state): State<ApiState>,
    Path((database, table)): Path<(String, String)>,
) -> ApiResult<Json<ProcessingTrackingInfo>> {
    if table.trim().is_empty() {
        return Err(ApiError::bad_request("table name is required"));
    }
    Ok(Json(state.pipeline.submit_table(&database, &table).await?))
}

pub async fn process_partition(
    State(state): State<ApiState>,
    Path((database, table, partition)): Path<(String, String, String)>,
    Query(options): Query<ProcessOptions>,
) -> ApiResult<Json<ResultMessage>> {
    let refreshed = state
        .manager
        .for_database(&database)
        .process_partition(&table, &partition, options.scope())
        .await?;
    Ok(Json(
        ResultMessage::new(format!(
            "Processed partition: {}/{}/{}",
            database, table, partition
        ))
        .with_count(usize::from(refreshed)),
    ))
}

pub async fn process_partition_async(
    State(state): State<ApiState>,
    Path((database, table, partition)): Path<(String, String, String)>,
) -> ApiResult<Json<ProcessingTrackingInfo>> {
    Ok(Json(
        state
            .pipeline
            .submit_partition(&database, &table, &partition)
            .await?,
    ))
}
