//! Double-entry ledger models and balance validation.

use crate::error::BillingError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Entry direction (debit or credit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Debit,
    Credit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Debit => "debit",
            Direction::Credit => "credit",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "debit" => Some(Direction::Debit),
            "credit" => Some(Direction::Credit),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Canonical chart-of-accounts codes.
pub mod account_codes {
    pub const ACCOUNTS_RECEIVABLE: &str = "accounts_receivable";
    pub const REVENUE: &str = "revenue";
    pub const CASH_CLEARING: &str = "cash_clearing";
    pub const CREDIT: &str = "credit";
    pub const TAX_PAYABLE: &str = "tax_payable";
}

/// Source types attributing an entry to its originating event.
pub mod source_types {
    pub const BILLING_CYCLE: &str = "billing_cycle";
    pub const PAYMENT_EVENT: &str = "payment_event";
    pub const ADJUSTMENT: &str = "adjustment";
    pub const REFUND: &str = "refund";
    pub const DISPUTE_WITHDRAWN: &str = "dispute_withdrawn";
    pub const DISPUTE_REINSTATED: &str = "dispute_reinstated";
}

/// Chart-of-accounts row, unique per `(org_id, code)`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerAccount {
    pub id: i64,
    pub org_id: i64,
    pub code: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Immutable header for one balanced posting. `occurred_at` is the business
/// timestamp and is preserved verbatim for reporting.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerEntry {
    pub id: i64,
    pub org_id: i64,
    pub source_type: String,
    pub source_id: i64,
    pub currency: String,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// One posting line. `amount` is always non-negative; the direction carries
/// the sign.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerEntryLine {
    pub id: i64,
    pub ledger_entry_id: i64,
    pub account_id: i64,
    pub direction: String,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntryLine {
    /// Signed amount: positive for debit, negative for credit.
    pub fn signed_amount(&self) -> i64 {
        match Direction::from_string(&self.direction) {
            Some(Direction::Debit) => self.amount,
            Some(Direction::Credit) => -self.amount,
            None => 0,
        }
    }
}

/// Input line for posting an entry.
#[derive(Debug, Clone, Copy)]
pub struct EntryLine {
    pub account_id: i64,
    pub direction: Direction,
    pub amount: i64,
}

/// Ensure the lines form a balanced double-entry posting: at least two
/// lines, no negative amounts, sum of debits equals sum of credits.
pub fn validate_balanced(lines: &[EntryLine]) -> Result<(), BillingError> {
    if lines.len() < 2 {
        return Err(BillingError::InvalidEntryLines);
    }

    let mut debit_total: i64 = 0;
    let mut credit_total: i64 = 0;
    for line in lines {
        if line.amount < 0 {
            return Err(BillingError::InvalidLineAmount);
        }
        match line.direction {
            Direction::Debit => debit_total += line.amount,
            Direction::Credit => credit_total += line.amount,
        }
    }

    if debit_total != credit_total {
        return Err(BillingError::UnbalancedEntry);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(direction: Direction, amount: i64) -> EntryLine {
        EntryLine {
            account_id: 1,
            direction,
            amount,
        }
    }

    #[test]
    fn balanced_entry_passes() {
        let lines = [line(Direction::Debit, 650), line(Direction::Credit, 650)];
        assert!(validate_balanced(&lines).is_ok());
    }

    #[test]
    fn multi_line_balance_is_summed_per_direction() {
        let lines = [
            line(Direction::Debit, 400),
            line(Direction::Debit, 250),
            line(Direction::Credit, 650),
        ];
        assert!(validate_balanced(&lines).is_ok());
    }

    #[test]
    fn single_line_is_rejected() {
        let lines = [line(Direction::Debit, 100)];
        assert!(matches!(
            validate_balanced(&lines),
            Err(BillingError::InvalidEntryLines)
        ));
    }

    #[test]
    fn negative_amount_is_rejected() {
        let lines = [line(Direction::Debit, -1), line(Direction::Credit, -1)];
        assert!(matches!(
            validate_balanced(&lines),
            Err(BillingError::InvalidLineAmount)
        ));
    }

    #[test]
    fn unbalanced_entry_is_rejected() {
        let lines = [line(Direction::Debit, 100), line(Direction::Credit, 99)];
        assert!(matches!(
            validate_balanced(&lines),
            Err(BillingError::UnbalancedEntry)
        ));
    }

    #[test]
    fn signed_amount_follows_direction() {
        let base = LedgerEntryLine {
            id: 1,
            ledger_entry_id: 1,
            account_id: 1,
            direction: "debit".to_string(),
            amount: 42,
            created_at: chrono::Utc::now(),
        };
        assert_eq!(base.signed_amount(), 42);
        let credit = LedgerEntryLine {
            direction: "credit".to_string(),
            ..base
        };
        assert_eq!(credit.signed_amount(), -42);
    }
}
