//! Error taxonomy for the billing lifecycle engine.
//!
//! Every variant's `Display` string is a stable snake_case code so the HTTP
//! layer, scheduler `last_error` latches, and audit entries all carry the
//! same identifier. Infrastructure failures are wrapped unchanged.

use service_core::error::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BillingError {
    // Validation
    #[error("invalid_organization")]
    InvalidOrganization,
    #[error("invalid_customer")]
    InvalidCustomer,
    #[error("invalid_meter_code")]
    InvalidMeterCode,
    #[error("invalid_value")]
    InvalidValue,
    #[error("invalid_currency")]
    InvalidCurrency,
    #[error("invalid_billing_cycle")]
    InvalidBillingCycle,
    #[error("invalid_line_amount")]
    InvalidLineAmount,
    #[error("invalid_line_direction")]
    InvalidLineDirection,
    #[error("invalid_entry_lines")]
    InvalidEntryLines,
    #[error("unbalanced_entry")]
    UnbalancedEntry,
    #[error("invalid_quantity")]
    InvalidQuantity,
    #[error("invalid_account")]
    InvalidAccount,
    #[error("invalid_source")]
    InvalidSource,
    #[error("invalid_occurred_at")]
    InvalidOccurredAt,
    #[error("invalid_event")]
    InvalidEvent,
    #[error("invalid_amount")]
    InvalidAmount,
    #[error("invalid_provider")]
    InvalidProvider,
    #[error("invalid_payload")]
    InvalidPayload,

    // State preconditions
    #[error("billing_cycle_not_found")]
    BillingCycleNotFound,
    #[error("billing_cycle_not_closing")]
    BillingCycleNotClosing,
    #[error("missing_rating_results")]
    MissingRatingResults,
    #[error("currency_mismatch")]
    CurrencyMismatch,
    #[error("missing_price_amount")]
    MissingPriceAmount,
    #[error("missing_meter")]
    MissingMeter,
    #[error("provider_not_found")]
    ProviderNotFound,

    // Idempotency / replay
    #[error("event_already_processed")]
    EventAlreadyProcessed,
    #[error("event_ignored")]
    EventIgnored,

    // Security
    #[error("invalid_signature")]
    InvalidSignature,
    #[error("invalid_config")]
    InvalidConfig,
    #[error("encryption_key_missing")]
    EncryptionKeyMissing,

    // Infrastructure: surfaced unchanged
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl BillingError {
    /// Stable code for metrics labels and `last_error` latches.
    pub fn code(&self) -> String {
        match self {
            BillingError::Database(_) => "database_error".to_string(),
            BillingError::Internal(_) => "internal_error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InvalidOrganization
            | BillingError::InvalidCustomer
            | BillingError::InvalidMeterCode
            | BillingError::InvalidValue
            | BillingError::InvalidCurrency
            | BillingError::InvalidBillingCycle
            | BillingError::InvalidLineAmount
            | BillingError::InvalidLineDirection
            | BillingError::InvalidEntryLines
            | BillingError::InvalidQuantity
            | BillingError::InvalidAccount
            | BillingError::InvalidSource
            | BillingError::InvalidOccurredAt
            | BillingError::InvalidEvent
            | BillingError::InvalidAmount
            | BillingError::InvalidProvider
            | BillingError::InvalidPayload
            | BillingError::BillingCycleNotClosing
            | BillingError::MissingRatingResults
            | BillingError::CurrencyMismatch
            | BillingError::MissingPriceAmount
            | BillingError::MissingMeter => AppError::BadRequest(anyhow::anyhow!("{err}")),
            BillingError::BillingCycleNotFound | BillingError::ProviderNotFound => {
                AppError::NotFound(anyhow::anyhow!("{err}"))
            }
            BillingError::EventAlreadyProcessed => AppError::Conflict(anyhow::anyhow!("{err}")),
            // `event_ignored` is success for the caller; handlers short-circuit
            // before reaching this mapping, so treat a leak as a bad request.
            BillingError::EventIgnored => AppError::BadRequest(anyhow::anyhow!("{err}")),
            BillingError::InvalidSignature => AppError::Unauthorized(anyhow::anyhow!("{err}")),
            BillingError::InvalidConfig | BillingError::EncryptionKeyMissing => {
                AppError::InternalError(anyhow::anyhow!("{err}"))
            }
            // Programmer error: must be loud.
            BillingError::UnbalancedEntry => AppError::InternalError(anyhow::anyhow!("{err}")),
            BillingError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            BillingError::Internal(e) => AppError::InternalError(e),
        }
    }
}
