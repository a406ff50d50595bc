//! Campaign Metric Handlers

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use validator::Validate;

use crate::application::dto::{IngestMetricsRequest, IngestResponse, SnapshotQuery, SnapshotResponse};
use crate::shared::error::AppError;
use crate::shared::validation::validation_error;
use crate::startup::AppState;

/// Accept a partial metric update and fan it out to dashboards
pub async fn ingest_metrics(
    State(state): State<AppState>,
    Json(body): Json<IngestMetricsRequest>,
) -> Result<(StatusCode, Json<IngestResponse>), AppError> {
    body.validate().map_err(validation_error)?;

    let outcome = state
        .metrics
        .ingest(&body.campaign_id, &body.platform, body.metrics)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(outcome.into())))
}

/// Latest values for the requested campaigns/platforms (cache-aside)
pub async fn get_snapshot(
    State(state): State<AppState>,
    Query(query): Query<SnapshotQuery>,
) -> Result<Json<SnapshotResponse>, AppError> {
    let filter = query.into_filter();
    if filter.is_empty() {
        return Err(AppError::BadRequest("campaignIds must not be empty".into()));
    }

    let updates = state.metrics.snapshot(&filter).await?;
    Ok(Json(SnapshotResponse { updates }))
}
