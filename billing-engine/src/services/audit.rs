//! Append-only audit sink.

use crate::error::BillingError;
use crate::models::ActorType;
use crate::services::clock::Clock;
use crate::services::idgen::IdGenerator;
use crate::services::Database;
use std::sync::Arc;
use tracing::{instrument, warn};

#[derive(Clone)]
pub struct AuditService {
    db: Database,
    idgen: Arc<IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl AuditService {
    pub fn new(db: Database, idgen: Arc<IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        Self { db, idgen, clock }
    }

    /// Append one audit record.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, metadata), fields(action = action, target_type = target_type))]
    pub async fn log(
        &self,
        org_id: Option<i64>,
        actor_type: ActorType,
        actor_id: Option<&str>,
        action: &str,
        target_type: &str,
        target_id: Option<&str>,
        metadata: serde_json::Value,
    ) -> Result<(), BillingError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (id, org_id, actor_type, actor_id, action, target_type, target_id, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(self.idgen.next_id())
        .bind(org_id)
        .bind(actor_type.as_str())
        .bind(actor_id)
        .bind(action)
        .bind(target_type)
        .bind(target_id)
        .bind(&metadata)
        .bind(self.clock.now())
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Append one audit record, logging instead of failing the caller when
    /// the sink is unavailable.
    #[allow(clippy::too_many_arguments)]
    pub async fn log_best_effort(
        &self,
        org_id: Option<i64>,
        actor_type: ActorType,
        actor_id: Option<&str>,
        action: &str,
        target_type: &str,
        target_id: Option<&str>,
        metadata: serde_json::Value,
    ) {
        if let Err(e) = self
            .log(org_id, actor_type, actor_id, action, target_type, target_id, metadata)
            .await
        {
            warn!(error = %e, action = action, "Failed to write audit log");
        }
    }
}
