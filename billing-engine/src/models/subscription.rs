//! Subscription and subscription item models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Paused,
    Canceled,
    Ended,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "PENDING",
            SubscriptionStatus::Active => "ACTIVE",
            SubscriptionStatus::Paused => "PAUSED",
            SubscriptionStatus::Canceled => "CANCELED",
            SubscriptionStatus::Ended => "ENDED",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "ACTIVE" => SubscriptionStatus::Active,
            "PAUSED" => SubscriptionStatus::Paused,
            "CANCELED" => SubscriptionStatus::Canceled,
            "ENDED" => SubscriptionStatus::Ended,
            _ => SubscriptionStatus::Pending,
        }
    }
}

/// How billing periods are derived for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingCycleType {
    Monthly,
    Custom,
}

impl BillingCycleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingCycleType::Monthly => "MONTHLY",
            BillingCycleType::Custom => "CUSTOM",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "CUSTOM" => BillingCycleType::Custom,
            _ => BillingCycleType::Monthly,
        }
    }
}

/// At most one ACTIVE subscription exists per `(org_id, customer_id)` at
/// any instant.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: i64,
    pub org_id: i64,
    pub customer_id: i64,
    pub status: String,
    pub activated_at: Option<DateTime<Utc>>,
    pub billing_cycle_type: String,
    pub custom_period_days: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn parsed_status(&self) -> SubscriptionStatus {
        SubscriptionStatus::from_string(&self.status)
    }

    pub fn parsed_cycle_type(&self) -> BillingCycleType {
        BillingCycleType::from_string(&self.billing_cycle_type)
    }
}

/// A priced component of a subscription, optionally bound to a meter and
/// an effective range consulted by snapshot resolution.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SubscriptionItem {
    pub id: i64,
    pub org_id: i64,
    pub subscription_id: i64,
    pub price_id: i64,
    pub meter_id: Option<i64>,
    pub effective_from: Option<DateTime<Utc>>,
    pub effective_to: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
