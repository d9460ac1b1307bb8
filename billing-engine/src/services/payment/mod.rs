//! Payment/dispute webhook pipeline: verify the provider signature,
//! dedupe by provider event id, parse to a canonical event, settle
//! against the ledger and invoice, and audit.

pub mod adapters;
pub mod crypto;

use crate::error::BillingError;
use crate::models::events::{DisputePayload, SettlementPayload, event_types};
use crate::models::payment::{dispute_event_types, payment_event_types};
use crate::models::{
    ActorType, DisputeEvent, DisputeRecord, DisputeStatus, EntryLine, PaymentEvent,
    PaymentEventRecord, account_codes, ledger::Direction, source_types,
};
use crate::services::Database;
use crate::services::audit::AuditService;
use crate::services::clock::Clock;
use crate::services::idgen::IdGenerator;
use crate::services::ledger::LedgerService;
use crate::services::metrics::record_webhook_event;
use crate::services::outbox::Outbox;
use self::adapters::{AdapterConfig, ParsedEvent, Registry};
use axum::http::HeaderMap;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;
use sqlx::FromRow;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Clone)]
pub struct PaymentService {
    db: Database,
    idgen: Arc<IdGenerator>,
    clock: Arc<dyn Clock>,
    ledger: LedgerService,
    audit: AuditService,
    outbox: Outbox,
    adapters: Arc<Registry>,
    enc_key: Option<[u8; 32]>,
}

#[derive(Debug, FromRow)]
struct ProviderConfigRow {
    org_id: i64,
    config: serde_json::Value,
}

impl PaymentService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        idgen: Arc<IdGenerator>,
        clock: Arc<dyn Clock>,
        ledger: LedgerService,
        audit: AuditService,
        outbox: Outbox,
        adapters: Arc<Registry>,
        master_secret: &str,
    ) -> Self {
        Self {
            db,
            idgen,
            clock,
            ledger,
            audit,
            outbox,
            adapters,
            enc_key: crypto::derive_key(master_secret),
        }
    }

    /// Ingest one provider webhook delivery. Ignored events succeed with no
    /// side effects; replays of a processed event fail with
    /// `event_already_processed`.
    #[instrument(skip(self, payload, headers), fields(provider = provider))]
    pub async fn ingest_webhook(
        &self,
        provider: &str,
        payload: &[u8],
        headers: &HeaderMap,
    ) -> Result<(), BillingError> {
        let provider = provider.trim().to_lowercase();
        let result = self.ingest_webhook_inner(&provider, payload, headers).await;
        match &result {
            Ok(()) => record_webhook_event(&provider, "ok"),
            Err(e) => record_webhook_event(&provider, &e.code()),
        }
        result
    }

    async fn ingest_webhook_inner(
        &self,
        provider: &str,
        payload: &[u8],
        headers: &HeaderMap,
    ) -> Result<(), BillingError> {
        if provider.is_empty() {
            return Err(BillingError::InvalidProvider);
        }
        if !self.adapters.provider_exists(provider) {
            return Err(BillingError::ProviderNotFound);
        }
        if serde_json::from_slice::<serde_json::Value>(payload).is_err() {
            return Err(BillingError::InvalidPayload);
        }

        let configs = self.list_active_configs(provider).await?;
        if configs.is_empty() {
            return Err(BillingError::ProviderNotFound);
        }

        let parsed = match self.match_adapter(provider, payload, headers, configs) {
            Ok(parsed) => parsed,
            Err(BillingError::EventIgnored) => return Ok(()),
            Err(e) => return Err(e),
        };

        match parsed {
            ParsedEvent::Payment(event) => self.process_payment_event(event, payload).await,
            ParsedEvent::Dispute(event) => self.process_dispute_event(event).await,
        }
    }

    async fn list_active_configs(
        &self,
        provider: &str,
    ) -> Result<Vec<ProviderConfigRow>, BillingError> {
        let rows = sqlx::query_as::<_, ProviderConfigRow>(
            r#"
            SELECT org_id, config
            FROM payment_provider_configs
            WHERE provider = $1 AND is_active = TRUE
            "#,
        )
        .bind(provider)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    /// Try each candidate config until one verifies the signature. A config
    /// that fails decryption or construction is skipped; a signature miss
    /// moves to the next candidate; any other failure aborts.
    fn match_adapter(
        &self,
        provider: &str,
        payload: &[u8],
        headers: &HeaderMap,
        configs: Vec<ProviderConfigRow>,
    ) -> Result<ParsedEvent, BillingError> {
        let mut config_err: Option<BillingError> = None;

        for row in configs {
            let decrypted = match crypto::decrypt_config(self.enc_key.as_ref(), &row.config) {
                Ok(decrypted) => decrypted,
                Err(BillingError::EncryptionKeyMissing) => {
                    return Err(BillingError::EncryptionKeyMissing);
                }
                Err(e) => {
                    config_err = Some(e);
                    continue;
                }
            };

            let adapter = match self.adapters.new_adapter(
                provider,
                AdapterConfig {
                    org_id: row.org_id,
                    provider: provider.to_string(),
                    config: decrypted,
                },
            ) {
                Ok(adapter) => adapter,
                Err(e) => {
                    config_err = Some(e);
                    continue;
                }
            };

            match adapter.verify(payload, headers) {
                Ok(()) => {}
                Err(BillingError::InvalidSignature) => continue,
                Err(e) => return Err(e),
            }

            let mut parsed = adapter.parse(payload)?;
            match &mut parsed {
                ParsedEvent::Payment(event) => {
                    event.provider = provider.to_string();
                    event.org_id = row.org_id;
                    validate_payment_event(event)?;
                }
                ParsedEvent::Dispute(event) => {
                    event.provider = provider.to_string();
                    event.org_id = row.org_id;
                    validate_dispute_event(event)?;
                }
            }
            return Ok(parsed);
        }

        if let Some(e) = config_err {
            return Err(e);
        }
        Err(BillingError::InvalidSignature)
    }

    // -------------------------------------------------------------------------
    // Payment events
    // -------------------------------------------------------------------------

    async fn process_payment_event(
        &self,
        event: PaymentEvent,
        payload: &[u8],
    ) -> Result<(), BillingError> {
        let now = self.clock.now();
        let record = PaymentEventRecord {
            id: self.idgen.next_id(),
            org_id: event.org_id,
            provider: event.provider.clone(),
            provider_event_id: event.provider_event_id.clone(),
            event_type: event.event_type.clone(),
            customer_id: event.customer_id,
            payload: serde_json::from_slice(payload).unwrap_or(serde_json::Value::Null),
            received_at: now,
            processed_at: None,
        };

        let inserted = self.insert_event_record(&record).await?;
        let stored = if inserted {
            record
        } else {
            let existing = self
                .load_event_record(&event.provider, &event.provider_event_id)
                .await?
                .ok_or(BillingError::InvalidEvent)?;
            if existing.processed_at.is_some() {
                return Err(BillingError::EventAlreadyProcessed);
            }
            existing
        };

        match event.event_type.as_str() {
            payment_event_types::PAYMENT_SUCCEEDED => {
                self.settle_payment(&stored, &event, false).await?;
            }
            payment_event_types::REFUNDED => {
                self.settle_payment(&stored, &event, true).await?;
            }
            payment_event_types::PAYMENT_FAILED => {
                self.write_payment_audit("payment.failed", &stored, &event, None)
                    .await;
            }
            _ => return Err(BillingError::InvalidEvent),
        }

        self.mark_event_processed(stored.id, self.clock.now()).await?;
        info!(
            provider = %stored.provider,
            provider_event_id = %stored.provider_event_id,
            event_type = %stored.event_type,
            "Payment event processed"
        );
        Ok(())
    }

    /// Post the settlement entry and update invoice metadata. A payment
    /// debits cash and credits AR; a refund mirrors it.
    async fn settle_payment(
        &self,
        stored: &PaymentEventRecord,
        event: &PaymentEvent,
        is_refund: bool,
    ) -> Result<(), BillingError> {
        let cash_id = self
            .ledger
            .ensure_account(stored.org_id, account_codes::CASH_CLEARING, "Cash / Clearing")
            .await?;
        let ar_id = self
            .ledger
            .ensure_account(
                stored.org_id,
                account_codes::ACCOUNTS_RECEIVABLE,
                "Accounts Receivable",
            )
            .await?;

        let (cash_direction, ar_direction) = if is_refund {
            (Direction::Credit, Direction::Debit)
        } else {
            (Direction::Debit, Direction::Credit)
        };
        let lines = [
            EntryLine {
                account_id: cash_id,
                direction: cash_direction,
                amount: event.amount,
            },
            EntryLine {
                account_id: ar_id,
                direction: ar_direction,
                amount: event.amount,
            },
        ];

        self.ledger
            .create_entry(
                stored.org_id,
                source_types::PAYMENT_EVENT,
                stored.id,
                &event.currency,
                event.occurred_at,
                &lines,
            )
            .await?;

        self.update_invoice_settlement(stored.org_id, event, is_refund)
            .await?;

        let balance = self
            .customer_balance(stored.org_id, event.customer_id, &event.currency)
            .await?;
        let (action, outbox_type) = if is_refund {
            ("payment.refunded", event_types::REFUND_SETTLED)
        } else {
            ("payment.received", event_types::PAYMENT_SETTLED)
        };
        self.write_payment_audit(action, stored, event, Some(json!({ "balance": balance })))
            .await;

        let settlement = SettlementPayload {
            payment_event_id: stored.id,
            org_id: stored.org_id,
            customer_id: event.customer_id,
            amount: event.amount,
            currency: event.currency.clone(),
            invoice_id: event.invoice_id,
        }
        .into_event(outbox_type);
        if let Err(e) = self.outbox.publish(settlement).await {
            warn!(error = %e, payment_event_id = stored.id, "Failed to publish settlement event");
        }

        Ok(())
    }

    async fn insert_event_record(&self, record: &PaymentEventRecord) -> Result<bool, BillingError> {
        let result = sqlx::query(
            r#"
            INSERT INTO payment_events (
                id, org_id, provider, provider_event_id, event_type,
                customer_id, payload, received_at, processed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NULL)
            ON CONFLICT (provider, provider_event_id) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(record.org_id)
        .bind(&record.provider)
        .bind(&record.provider_event_id)
        .bind(&record.event_type)
        .bind(record.customer_id)
        .bind(&record.payload)
        .bind(record.received_at)
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn load_event_record(
        &self,
        provider: &str,
        provider_event_id: &str,
    ) -> Result<Option<PaymentEventRecord>, BillingError> {
        let record = sqlx::query_as::<_, PaymentEventRecord>(
            r#"
            SELECT id, org_id, provider, provider_event_id, event_type,
                   customer_id, payload, received_at, processed_at
            FROM payment_events
            WHERE provider = $1 AND provider_event_id = $2
            "#,
        )
        .bind(provider)
        .bind(provider_event_id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(record)
    }

    async fn mark_event_processed(
        &self,
        id: i64,
        processed_at: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        sqlx::query(
            "UPDATE payment_events SET processed_at = COALESCE(processed_at, $2) WHERE id = $1",
        )
        .bind(id)
        .bind(processed_at)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Dispute events
    // -------------------------------------------------------------------------

    async fn process_dispute_event(&self, event: DisputeEvent) -> Result<(), BillingError> {
        let now = self.clock.now();
        let status = match event.event_type.as_str() {
            dispute_event_types::FUNDS_WITHDRAWN => DisputeStatus::Withdrawn,
            dispute_event_types::FUNDS_REINSTATED => DisputeStatus::Reinstated,
            _ => return Err(BillingError::InvalidEvent),
        };

        let record_id = {
            let mut tx = self.db.pool().begin().await?;
            let existing = sqlx::query_as::<_, DisputeRecord>(
                r#"
                SELECT id, org_id, provider, provider_dispute_id, provider_event_id,
                       customer_id, amount, currency, status, reason, received_at, processed_at
                FROM payment_disputes
                WHERE provider = $1 AND provider_dispute_id = $2
                FOR UPDATE
                "#,
            )
            .bind(&event.provider)
            .bind(&event.provider_dispute_id)
            .fetch_optional(&mut *tx)
            .await?;

            let record_id = match existing {
                Some(record) => {
                    if record.provider_event_id == event.provider_event_id
                        && record.processed_at.is_some()
                    {
                        tx.rollback().await?;
                        return Err(BillingError::EventAlreadyProcessed);
                    }
                    sqlx::query(
                        r#"
                        UPDATE payment_disputes
                        SET provider_event_id = $2, status = $3, amount = $4,
                            reason = COALESCE($5, reason), processed_at = NULL
                        WHERE id = $1
                        "#,
                    )
                    .bind(record.id)
                    .bind(&event.provider_event_id)
                    .bind(status.as_str())
                    .bind(event.amount)
                    .bind(&event.reason)
                    .execute(&mut *tx)
                    .await?;
                    record.id
                }
                None => {
                    let id = self.idgen.next_id();
                    sqlx::query(
                        r#"
                        INSERT INTO payment_disputes (
                            id, org_id, provider, provider_dispute_id, provider_event_id,
                            customer_id, amount, currency, status, reason, received_at, processed_at
                        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NULL)
                        "#,
                    )
                    .bind(id)
                    .bind(event.org_id)
                    .bind(&event.provider)
                    .bind(&event.provider_dispute_id)
                    .bind(&event.provider_event_id)
                    .bind(event.customer_id)
                    .bind(event.amount)
                    .bind(&event.currency)
                    .bind(status.as_str())
                    .bind(&event.reason)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                    id
                }
            };
            tx.commit().await?;
            record_id
        };

        // Funds withdrawn mirror a refund; reinstated funds mirror a payment.
        let (source_type, cash_direction, ar_direction, action, outbox_type) = match status {
            DisputeStatus::Withdrawn => (
                source_types::DISPUTE_WITHDRAWN,
                Direction::Credit,
                Direction::Debit,
                "dispute.withdrawn",
                event_types::DISPUTE_WITHDRAWN,
            ),
            _ => (
                source_types::DISPUTE_REINSTATED,
                Direction::Debit,
                Direction::Credit,
                "dispute.reinstated",
                event_types::DISPUTE_REINSTATED,
            ),
        };

        let cash_id = self
            .ledger
            .ensure_account(event.org_id, account_codes::CASH_CLEARING, "Cash / Clearing")
            .await?;
        let ar_id = self
            .ledger
            .ensure_account(
                event.org_id,
                account_codes::ACCOUNTS_RECEIVABLE,
                "Accounts Receivable",
            )
            .await?;
        let lines = [
            EntryLine {
                account_id: cash_id,
                direction: cash_direction,
                amount: event.amount,
            },
            EntryLine {
                account_id: ar_id,
                direction: ar_direction,
                amount: event.amount,
            },
        ];
        self.ledger
            .create_entry(
                event.org_id,
                source_type,
                record_id,
                &event.currency,
                event.occurred_at,
                &lines,
            )
            .await?;

        let balance = self
            .customer_balance(event.org_id, event.customer_id, &event.currency)
            .await?;
        let metadata = json!({
            "provider": event.provider,
            "provider_event_id": event.provider_event_id,
            "provider_dispute_id": event.provider_dispute_id,
            "customer_id": event.customer_id.to_string(),
            "amount": event.amount,
            "currency": event.currency,
            "event_type": event.event_type,
            "dispute_id": record_id.to_string(),
            "occurred_at": event.occurred_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            "balance": balance,
        });
        self.audit
            .log_best_effort(
                Some(event.org_id),
                ActorType::System,
                None,
                action,
                "payment_dispute",
                Some(&record_id.to_string()),
                metadata,
            )
            .await;

        let dispute_event = DisputePayload {
            dispute_id: record_id,
            org_id: event.org_id,
            customer_id: event.customer_id,
            amount: event.amount,
            currency: event.currency.clone(),
            provider_event_id: event.provider_event_id.clone(),
        }
        .into_event(outbox_type);
        if let Err(e) = self.outbox.publish(dispute_event).await {
            warn!(error = %e, dispute_id = record_id, "Failed to publish dispute event");
        }

        sqlx::query("UPDATE payment_disputes SET processed_at = $2 WHERE id = $1")
            .bind(record_id)
            .bind(self.clock.now())
            .execute(self.db.pool())
            .await?;

        info!(
            provider = %event.provider,
            provider_dispute_id = %event.provider_dispute_id,
            status = status.as_str(),
            "Dispute event processed"
        );
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Settlement helpers
    // -------------------------------------------------------------------------

    /// Fold a settlement into invoice metadata under a row lock:
    /// `amount_paid` accumulates (clamped at zero) and `paid_at` tracks
    /// whether the subtotal is covered.
    async fn update_invoice_settlement(
        &self,
        org_id: i64,
        event: &PaymentEvent,
        is_refund: bool,
    ) -> Result<(), BillingError> {
        let Some(invoice_id) = event.invoice_id.filter(|id| *id != 0) else {
            return Ok(());
        };

        #[derive(FromRow)]
        struct InvoiceRow {
            id: i64,
            subtotal_amount: i64,
            metadata: serde_json::Value,
        }

        let mut tx = self.db.pool().begin().await?;

        let row = sqlx::query_as::<_, InvoiceRow>(
            r#"
            SELECT id, subtotal_amount, metadata
            FROM invoices
            WHERE id = $1 AND org_id = $2
            FOR UPDATE
            "#,
        )
        .bind(invoice_id)
        .bind(org_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(());
        };

        let mut metadata = match row.metadata {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };

        let mut paid = read_metadata_amount(&metadata, "amount_paid");
        if is_refund {
            paid -= event.amount;
        } else {
            paid += event.amount;
        }
        if paid < 0 {
            paid = 0;
        }
        metadata.insert("amount_paid".to_string(), json!(paid));

        let now = self.clock.now();
        if row.subtotal_amount > 0 && paid >= row.subtotal_amount {
            metadata.insert(
                "paid_at".to_string(),
                json!(now.to_rfc3339_opts(SecondsFormat::Secs, true)),
            );
        } else {
            metadata.remove("paid_at");
        }

        sqlx::query("UPDATE invoices SET metadata = $2, updated_at = $3 WHERE id = $1")
            .bind(row.id)
            .bind(serde_json::Value::Object(metadata))
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Recompute the customer's AR balance in the event currency, joining
    /// each entry back to its customer through the cycle's subscription,
    /// the payment event, or the dispute record.
    async fn customer_balance(
        &self,
        org_id: i64,
        customer_id: i64,
        currency: &str,
    ) -> Result<i64, BillingError> {
        let currency = currency.trim();
        if currency.is_empty() {
            return Err(BillingError::InvalidCurrency);
        }

        let balance: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(CASE l.direction WHEN 'debit' THEN l.amount ELSE -l.amount END), 0)::BIGINT
            FROM ledger_entries le
            JOIN ledger_entry_lines l ON l.ledger_entry_id = le.id
            JOIN ledger_accounts a ON a.id = l.account_id
            LEFT JOIN billing_cycles bc ON bc.id = le.source_id AND le.source_type = $4
            LEFT JOIN subscriptions s ON s.id = bc.subscription_id
            LEFT JOIN payment_events pe ON pe.id = le.source_id AND le.source_type = $5
            LEFT JOIN payment_disputes pd ON pd.id = le.source_id AND le.source_type IN ($6, $7)
            WHERE le.org_id = $1
              AND a.code = $2
              AND le.currency = $3
              AND ((le.source_type = $4 AND s.customer_id = $8)
                OR (le.source_type = $5 AND pe.customer_id = $8)
                OR (le.source_type IN ($6, $7) AND pd.customer_id = $8))
            "#,
        )
        .bind(org_id)
        .bind(account_codes::ACCOUNTS_RECEIVABLE)
        .bind(currency)
        .bind(source_types::BILLING_CYCLE)
        .bind(source_types::PAYMENT_EVENT)
        .bind(source_types::DISPUTE_WITHDRAWN)
        .bind(source_types::DISPUTE_REINSTATED)
        .bind(customer_id)
        .fetch_one(self.db.pool())
        .await?;
        Ok(balance)
    }

    async fn write_payment_audit(
        &self,
        action: &str,
        stored: &PaymentEventRecord,
        event: &PaymentEvent,
        extra: Option<serde_json::Value>,
    ) {
        let mut metadata = json!({
            "provider": stored.provider,
            "provider_event_id": stored.provider_event_id,
            "customer_id": stored.customer_id.to_string(),
            "amount": event.amount,
            "currency": event.currency,
            "event_type": stored.event_type,
            "payment_event_id": stored.id.to_string(),
            "occurred_at": event.occurred_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            "received_at": stored.received_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        });
        if let Some(invoice_id) = event.invoice_id.filter(|id| *id != 0) {
            metadata["invoice_id"] = json!(invoice_id.to_string());
        }
        match self.db.customer_name(stored.org_id, stored.customer_id).await {
            Ok(name) if !name.is_empty() => {
                metadata["customer_name"] = json!(name);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to load customer name for audit"),
        }
        if let Some(serde_json::Value::Object(extra)) = extra {
            for (key, value) in extra {
                metadata[key] = value;
            }
        }

        self.audit
            .log_best_effort(
                Some(stored.org_id),
                ActorType::System,
                None,
                action,
                "payment_event",
                Some(&stored.id.to_string()),
                metadata,
            )
            .await;
    }
}

fn validate_payment_event(event: &mut PaymentEvent) -> Result<(), BillingError> {
    event.provider_event_id = event.provider_event_id.trim().to_string();
    if event.provider_event_id.is_empty() {
        return Err(BillingError::InvalidEvent);
    }
    event.event_type = event.event_type.trim().to_string();
    if event.event_type.is_empty() {
        return Err(BillingError::InvalidEvent);
    }
    if event.org_id == 0 {
        return Err(BillingError::InvalidEvent);
    }
    if event.customer_id == 0 {
        return Err(BillingError::InvalidCustomer);
    }
    let currency = event.currency.trim();
    if currency.is_empty() {
        return Err(BillingError::InvalidCurrency);
    }
    event.currency = currency.to_uppercase();
    if event.occurred_at.timestamp() == 0 {
        return Err(BillingError::InvalidEvent);
    }
    match event.event_type.as_str() {
        payment_event_types::PAYMENT_SUCCEEDED | payment_event_types::REFUNDED => {
            if event.amount <= 0 {
                return Err(BillingError::InvalidAmount);
            }
        }
        payment_event_types::PAYMENT_FAILED => {}
        _ => return Err(BillingError::InvalidEvent),
    }
    Ok(())
}

fn validate_dispute_event(event: &mut DisputeEvent) -> Result<(), BillingError> {
    event.provider_event_id = event.provider_event_id.trim().to_string();
    event.provider_dispute_id = event.provider_dispute_id.trim().to_string();
    if event.provider_event_id.is_empty() || event.provider_dispute_id.is_empty() {
        return Err(BillingError::InvalidEvent);
    }
    if event.org_id == 0 {
        return Err(BillingError::InvalidEvent);
    }
    if event.customer_id == 0 {
        return Err(BillingError::InvalidCustomer);
    }
    let currency = event.currency.trim();
    if currency.is_empty() {
        return Err(BillingError::InvalidCurrency);
    }
    event.currency = currency.to_uppercase();
    if event.occurred_at.timestamp() == 0 {
        return Err(BillingError::InvalidEvent);
    }
    if event.amount <= 0 {
        return Err(BillingError::InvalidAmount);
    }
    match event.event_type.as_str() {
        dispute_event_types::FUNDS_WITHDRAWN | dispute_event_types::FUNDS_REINSTATED => Ok(()),
        _ => Err(BillingError::InvalidEvent),
    }
}

#[cfg(test)]
fn read_metadata_amount_for_tests(metadata: &serde_json::Map<String, serde_json::Value>) -> i64 {
    read_metadata_amount(metadata, "amount_paid")
}

/// Read a monetary amount out of invoice metadata, tolerating number and
/// string encodings left by earlier writers.
fn read_metadata_amount(metadata: &serde_json::Map<String, serde_json::Value>, key: &str) -> i64 {
    match metadata.get(key) {
        Some(serde_json::Value::Number(n)) => n.as_i64().unwrap_or_else(|| {
            n.as_f64().map(|f| f as i64).unwrap_or(0)
        }),
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}
