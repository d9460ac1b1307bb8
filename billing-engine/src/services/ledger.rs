//! Balanced double-entry ledger writer with chart-of-accounts bootstrap.
//!
//! The ledger exposes no mutation; corrections are additional entries.

use crate::error::BillingError;
use crate::models::events::LedgerEntryPayload;
use crate::models::{EntryLine, LedgerEntry, LedgerEntryLine, validate_balanced};
use crate::services::Database;
use crate::services::clock::Clock;
use crate::services::idgen::IdGenerator;
use crate::services::metrics::{DB_QUERY_DURATION, record_ledger_entry};
use crate::services::outbox::Outbox;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Clone)]
pub struct LedgerService {
    db: Database,
    idgen: Arc<IdGenerator>,
    clock: Arc<dyn Clock>,
    outbox: Outbox,
}

impl LedgerService {
    pub fn new(
        db: Database,
        idgen: Arc<IdGenerator>,
        clock: Arc<dyn Clock>,
        outbox: Outbox,
    ) -> Self {
        Self {
            db,
            idgen,
            clock,
            outbox,
        }
    }

    /// Write a balanced entry (header plus lines) in one transaction and
    /// publish `ledger_entry_created` atomically with it. `occurred_at` is
    /// preserved verbatim.
    #[instrument(skip(self, lines), fields(org_id = org_id, source_type = source_type, source_id = source_id))]
    pub async fn create_entry(
        &self,
        org_id: i64,
        source_type: &str,
        source_id: i64,
        currency: &str,
        occurred_at: DateTime<Utc>,
        lines: &[EntryLine],
    ) -> Result<i64, BillingError> {
        if org_id == 0 {
            return Err(BillingError::InvalidOrganization);
        }
        let source_type = source_type.trim();
        if source_type.is_empty() || source_id == 0 {
            return Err(BillingError::InvalidSource);
        }
        let currency = currency.trim().to_uppercase();
        if currency.is_empty() {
            return Err(BillingError::InvalidCurrency);
        }
        validate_balanced(lines)?;

        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_ledger_entry"])
            .start_timer();

        let entry_id = self.idgen.next_id();
        let now = self.clock.now();

        let mut tx = self.db.pool().begin().await?;

        sqlx::query(
            r#"
            INSERT INTO ledger_entries (id, org_id, source_type, source_id, currency, occurred_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry_id)
        .bind(org_id)
        .bind(source_type)
        .bind(source_id)
        .bind(&currency)
        .bind(occurred_at)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for line in lines {
            sqlx::query(
                r#"
                INSERT INTO ledger_entry_lines (id, ledger_entry_id, account_id, direction, amount, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(self.idgen.next_id())
            .bind(entry_id)
            .bind(line.account_id)
            .bind(line.direction.as_str())
            .bind(line.amount)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        self.outbox
            .publish_tx(
                &mut tx,
                LedgerEntryPayload {
                    ledger_entry_id: entry_id,
                    org_id,
                    source_type: source_type.to_string(),
                    source_id,
                }
                .into_event(),
            )
            .await?;

        tx.commit().await?;

        timer.observe_duration();
        record_ledger_entry(source_type);
        info!(
            ledger_entry_id = entry_id,
            line_count = lines.len(),
            currency = %currency,
            "Ledger entry posted"
        );

        Ok(entry_id)
    }

    /// Return the account id for `(org_id, code)`, creating the account on
    /// first use. Concurrent creators converge through the conflict-skip
    /// insert plus re-read.
    #[instrument(skip(self), fields(org_id = org_id, code = code))]
    pub async fn ensure_account(
        &self,
        org_id: i64,
        code: &str,
        name: &str,
    ) -> Result<i64, BillingError> {
        let code = code.trim();
        let name = name.trim();
        if code.is_empty() || name.is_empty() {
            return Err(BillingError::InvalidAccount);
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["ensure_ledger_account"])
            .start_timer();

        if let Some(id) = self.find_account(org_id, code).await? {
            timer.observe_duration();
            return Ok(id);
        }

        sqlx::query(
            r#"
            INSERT INTO ledger_accounts (id, org_id, code, name, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (org_id, code) DO NOTHING
            "#,
        )
        .bind(self.idgen.next_id())
        .bind(org_id)
        .bind(code)
        .bind(name)
        .bind(self.clock.now())
        .execute(self.db.pool())
        .await?;

        let id = self
            .find_account(org_id, code)
            .await?
            .ok_or(BillingError::InvalidAccount)?;

        timer.observe_duration();
        Ok(id)
    }

    async fn find_account(&self, org_id: i64, code: &str) -> Result<Option<i64>, BillingError> {
        let id: Option<i64> =
            sqlx::query_scalar("SELECT id FROM ledger_accounts WHERE org_id = $1 AND code = $2")
                .bind(org_id)
                .bind(code)
                .fetch_optional(self.db.pool())
                .await?;
        Ok(id)
    }

    /// The most recent entry id for a source, if one exists. Used by the
    /// scheduler to keep cycle posting idempotent across retries.
    pub async fn find_entry_by_source(
        &self,
        org_id: i64,
        source_type: &str,
        source_id: i64,
    ) -> Result<Option<i64>, BillingError> {
        let id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id
            FROM ledger_entries
            WHERE org_id = $1 AND source_type = $2 AND source_id = $3
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(org_id)
        .bind(source_type)
        .bind(source_id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(id)
    }

    /// Load one entry header.
    pub async fn find_entry(&self, entry_id: i64) -> Result<Option<LedgerEntry>, BillingError> {
        let entry = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT id, org_id, source_type, source_id, currency, occurred_at, created_at
            FROM ledger_entries
            WHERE id = $1
            "#,
        )
        .bind(entry_id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(entry)
    }

    /// Load all lines of one entry, ordered by id.
    pub async fn entry_lines(&self, entry_id: i64) -> Result<Vec<LedgerEntryLine>, BillingError> {
        let lines = sqlx::query_as::<_, LedgerEntryLine>(
            r#"
            SELECT id, ledger_entry_id, account_id, direction, amount, created_at
            FROM ledger_entry_lines
            WHERE ledger_entry_id = $1
            ORDER BY id
            "#,
        )
        .bind(entry_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(lines)
    }
}
