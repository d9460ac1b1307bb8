//! Transactional outbox: deduplicated publication of billing events into
//! the `billing_events` table. Delivery to consumers is the relay's
//! concern; the engine guarantees at most one insert per
//! `(org_id, dedupe_key)`.

use crate::error::BillingError;
use crate::models::Event;
use crate::services::clock::Clock;
use crate::services::idgen::IdGenerator;
use crate::services::metrics::record_outbox_event;
use crate::services::Database;
use sqlx::{Postgres, Transaction};
use std::sync::Arc;
use tracing::instrument;

#[derive(Clone)]
pub struct Outbox {
    db: Database,
    idgen: Arc<IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl Outbox {
    pub fn new(db: Database, idgen: Arc<IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        Self { db, idgen, clock }
    }

    /// Store an event using the default connection pool.
    #[instrument(skip(self, event), fields(event_type = %event.event_type, org_id = event.org_id))]
    pub async fn publish(&self, event: Event) -> Result<(), BillingError> {
        let (sql_event, id, now) = self.prepare(event)?;
        sqlx::query(INSERT_EVENT)
            .bind(id)
            .bind(sql_event.org_id)
            .bind(&sql_event.event_type)
            .bind(&sql_event.payload)
            .bind(dedupe_value(&sql_event.dedupe_key))
            .bind(now)
            .execute(self.db.pool())
            .await?;
        record_outbox_event(&sql_event.event_type);
        Ok(())
    }

    /// Store an event on a caller-provided transaction so the domain
    /// mutation and its event commit atomically.
    #[instrument(skip(self, tx, event), fields(event_type = %event.event_type, org_id = event.org_id))]
    pub async fn publish_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: Event,
    ) -> Result<(), BillingError> {
        let (sql_event, id, now) = self.prepare(event)?;
        sqlx::query(INSERT_EVENT)
            .bind(id)
            .bind(sql_event.org_id)
            .bind(&sql_event.event_type)
            .bind(&sql_event.payload)
            .bind(dedupe_value(&sql_event.dedupe_key))
            .bind(now)
            .execute(&mut **tx)
            .await?;
        record_outbox_event(&sql_event.event_type);
        Ok(())
    }

    fn prepare(
        &self,
        mut event: Event,
    ) -> Result<(Event, i64, chrono::DateTime<chrono::Utc>), BillingError> {
        if event.org_id == 0 {
            return Err(BillingError::InvalidOrganization);
        }
        event.event_type = event.event_type.trim().to_string();
        if event.event_type.is_empty() {
            return Err(BillingError::InvalidEvent);
        }
        event.dedupe_key = event.dedupe_key.trim().to_string();
        Ok((event, self.idgen.next_id(), self.clock.now()))
    }
}

const INSERT_EVENT: &str = r#"
INSERT INTO billing_events (id, org_id, event_type, payload, dedupe_key, published, created_at)
VALUES ($1, $2, $3, $4, $5, FALSE, $6)
ON CONFLICT (org_id, dedupe_key) WHERE dedupe_key IS NOT NULL DO NOTHING
"#;

fn dedupe_value(dedupe_key: &str) -> Option<&str> {
    if dedupe_key.is_empty() {
        None
    } else {
        Some(dedupe_key)
    }
}
