//! Provider adapter seam: verify a signed webhook and parse it into a
//! canonical payment or dispute event.

pub mod stripe;

use crate::error::BillingError;
use crate::models::{DisputeEvent, PaymentEvent};
use axum::http::HeaderMap;
use serde_json::Value;
use std::collections::HashMap;

/// A webhook parsed into the engine's canonical shape.
#[derive(Debug, Clone)]
pub enum ParsedEvent {
    Payment(PaymentEvent),
    Dispute(DisputeEvent),
}

/// Decrypted configuration handed to adapter constructors.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub org_id: i64,
    pub provider: String,
    pub config: HashMap<String, Value>,
}

pub trait PaymentAdapter: Send + Sync {
    /// Check the provider signature over the raw payload. Returns
    /// `invalid_signature` when the payload was not signed with this
    /// config's secret.
    fn verify(&self, payload: &[u8], headers: &HeaderMap) -> Result<(), BillingError>;

    /// Parse a verified payload. `event_ignored` means the provider event
    /// type carries no billing meaning and the webhook succeeds with no
    /// side effects.
    fn parse(&self, payload: &[u8]) -> Result<ParsedEvent, BillingError>;
}

type AdapterFactory =
    fn(AdapterConfig) -> Result<Box<dyn PaymentAdapter>, BillingError>;

/// Registry of known provider adapters.
pub struct Registry {
    factories: HashMap<String, AdapterFactory>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with every built-in adapter registered.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("stripe", stripe::new_adapter);
        registry
    }

    pub fn register(&mut self, provider: &str, factory: AdapterFactory) {
        self.factories.insert(provider.to_string(), factory);
    }

    pub fn provider_exists(&self, provider: &str) -> bool {
        self.factories.contains_key(provider)
    }

    pub fn new_adapter(
        &self,
        provider: &str,
        config: AdapterConfig,
    ) -> Result<Box<dyn PaymentAdapter>, BillingError> {
        let factory = self
            .factories
            .get(provider)
            .ok_or(BillingError::ProviderNotFound)?;
        factory(config)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_knows_stripe() {
        let registry = Registry::with_builtin();
        assert!(registry.provider_exists("stripe"));
        assert!(!registry.provider_exists("ghost"));
    }

    #[test]
    fn unknown_provider_fails_construction() {
        let registry = Registry::with_builtin();
        let err = registry
            .new_adapter(
                "ghost",
                AdapterConfig {
                    org_id: 1,
                    provider: "ghost".to_string(),
                    config: HashMap::new(),
                },
            )
            .err()
            .unwrap();
        assert!(matches!(err, BillingError::ProviderNotFound));
    }
}
