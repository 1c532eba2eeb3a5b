//! Job status lookup

use super::{ApiResult, ApiState};
use crate::jobs::ProcessingTrackingInfo;
use axum::extract::{Path, State};
use axum::Json;

/// `operation` is one of `model`, `table`, `partition`; the key is the
/// `LaunchDateKey` and `TrackingId` returned at submission.
pub async fn get_status(
    State(state): State<ApiState>,
    Path((operation, partition_key, tracking_id)): Path<(String, String, String)>,
) -> ApiResult<Json<ProcessingTrackingInfo>> {
    Ok(Json(
        state
            .pipeline
            .query_status(&operation, &partition_key, &tracking_id)
            .await?,
    ))
}
