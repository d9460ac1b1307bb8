//! HTTP handlers for the engine's ingest and webhook surfaces.
//!
//! Full CRUD/admin routing lives in a separate API service; the engine
//! only exposes the contracts it owns.

pub mod usage;
pub mod webhooks;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

/// Organization identity extracted from request headers.
///
/// The `X-Org-ID` header is set by the authenticating layer (API-key or
/// session) in front of the engine; requests without it are rejected
/// before any engine code runs.
#[derive(Debug, Clone, Copy)]
pub struct OrgContext {
    pub org_id: i64,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for OrgContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let org_id = parts
            .headers
            .get("X-Org-ID")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|v| *v > 0)
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!("Missing or invalid X-Org-ID header"))
            })?;

        tracing::Span::current().record("org_id", org_id);

        Ok(OrgContext { org_id })
    }
}
