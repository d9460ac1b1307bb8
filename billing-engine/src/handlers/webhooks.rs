//! Provider webhook endpoint.

use crate::error::BillingError;
use crate::startup::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use service_core::error::AppError;

/// `POST /v1/webhooks/{provider}` - verify, dedupe, and settle one provider
/// delivery. Ignored events return 200 with no side effects; a replay of a
/// processed event returns 409 so the provider stops retrying.
pub async fn ingest_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    match state.payments.ingest_webhook(&provider, &body, &headers).await {
        Ok(()) => Ok(StatusCode::OK),
        Err(BillingError::EventIgnored) => Ok(StatusCode::OK),
        Err(e) => Err(AppError::from(e)),
    }
}
