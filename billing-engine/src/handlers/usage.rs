//! Usage ingestion endpoint.

use super::OrgContext;
use crate::models::IngestRequest;
use crate::startup::AppState;
use axum::{Json, extract::State, http::StatusCode};
use service_core::error::AppError;

/// `POST /v1/usage` - validate and store one usage event. Replays of the
/// same `(org, idempotency_key)` return the previously stored row.
pub async fn ingest_usage(
    State(state): State<AppState>,
    org: OrgContext,
    Json(payload): Json<IngestRequest>,
) -> Result<(StatusCode, Json<crate::models::UsageEvent>), AppError> {
    let record = state
        .usage
        .ingest(org.org_id, payload)
        .await
        .map_err(AppError::from)?;
    Ok((StatusCode::ACCEPTED, Json(record)))
}
