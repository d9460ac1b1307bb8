//! Stripe webhook adapter.
//!
//! Verifies `Stripe-Signature` headers (`t=<unix>,v1=<hex>` where the
//! signature is HMAC-SHA256 over `"{t}.{body}"`) and maps the small set of
//! billing-relevant event types onto canonical payment/dispute events.
//! Internal customer and invoice ids are read from the object's
//! `metadata`, where checkout stamps them at session creation.

use super::{AdapterConfig, ParsedEvent, PaymentAdapter};
use crate::error::BillingError;
use crate::models::payment::{dispute_event_types, payment_event_types};
use crate::models::{DisputeEvent, PaymentEvent};
use axum::http::HeaderMap;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

const SIGNATURE_HEADER: &str = "stripe-signature";
const DEFAULT_TOLERANCE_SECS: i64 = 300;

type HmacSha256 = Hmac<Sha256>;

pub struct StripeAdapter {
    webhook_secret: String,
    tolerance_secs: i64,
}

pub fn new_adapter(config: AdapterConfig) -> Result<Box<dyn PaymentAdapter>, BillingError> {
    let webhook_secret = config
        .config
        .get("webhook_secret")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(BillingError::InvalidConfig)?
        .to_string();
    let tolerance_secs = config
        .config
        .get("tolerance_seconds")
        .and_then(Value::as_i64)
        .unwrap_or(DEFAULT_TOLERANCE_SECS);

    Ok(Box::new(StripeAdapter {
        webhook_secret,
        tolerance_secs,
    }))
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: WebhookObject,
}

#[derive(Debug, Deserialize)]
struct WebhookObject {
    #[serde(default)]
    id: String,
    #[serde(default)]
    amount: i64,
    #[serde(default)]
    currency: String,
    #[serde(default)]
    created: i64,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    metadata: serde_json::Map<String, Value>,
}

impl WebhookObject {
    fn metadata_id(&self, key: &str) -> Option<i64> {
        match self.metadata.get(key)? {
            Value::String(s) => s.trim().parse().ok(),
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.created, 0)
            .single()
            .unwrap_or_default()
    }
}

impl PaymentAdapter for StripeAdapter {
    fn verify(&self, payload: &[u8], headers: &HeaderMap) -> Result<(), BillingError> {
        let header = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(BillingError::InvalidSignature)?;

        let (timestamp, signature) =
            parse_signature_header(header).ok_or(BillingError::InvalidSignature)?;

        if self.tolerance_secs > 0 {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            if (now - timestamp).abs() > self.tolerance_secs {
                return Err(BillingError::InvalidSignature);
            }
        }

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| BillingError::InvalidSignature)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        let expected = hex::encode(mac.finalize().into_bytes());

        if !constant_time_eq(&expected, &signature) {
            return Err(BillingError::InvalidSignature);
        }
        Ok(())
    }

    fn parse(&self, payload: &[u8]) -> Result<ParsedEvent, BillingError> {
        let envelope: WebhookEnvelope =
            serde_json::from_slice(payload).map_err(|_| BillingError::InvalidPayload)?;
        let object = &envelope.data.object;

        let payment_type = match envelope.event_type.as_str() {
            "invoice.payment_succeeded" | "charge.succeeded" => {
                Some(payment_event_types::PAYMENT_SUCCEEDED)
            }
            "charge.refunded" => Some(payment_event_types::REFUNDED),
            "invoice.payment_failed" | "charge.failed" => {
                Some(payment_event_types::PAYMENT_FAILED)
            }
            _ => None,
        };

        if let Some(event_type) = payment_type {
            return Ok(ParsedEvent::Payment(PaymentEvent {
                provider: String::new(),
                provider_event_id: envelope.id.clone(),
                event_type: event_type.to_string(),
                org_id: 0,
                customer_id: object.metadata_id("customer_id").unwrap_or(0),
                amount: object.amount,
                currency: object.currency.clone(),
                occurred_at: object.occurred_at(),
                invoice_id: object.metadata_id("invoice_id"),
            }));
        }

        let dispute_type = match envelope.event_type.as_str() {
            "charge.dispute.funds_withdrawn" => Some(dispute_event_types::FUNDS_WITHDRAWN),
            "charge.dispute.funds_reinstated" => Some(dispute_event_types::FUNDS_REINSTATED),
            _ => None,
        };

        if let Some(event_type) = dispute_type {
            return Ok(ParsedEvent::Dispute(DisputeEvent {
                provider: String::new(),
                provider_event_id: envelope.id.clone(),
                provider_dispute_id: object.id.clone(),
                event_type: event_type.to_string(),
                org_id: 0,
                customer_id: object.metadata_id("customer_id").unwrap_or(0),
                amount: object.amount,
                currency: object.currency.clone(),
                reason: object.reason.clone(),
                occurred_at: object.occurred_at(),
            }));
        }

        Err(BillingError::EventIgnored)
    }
}

fn parse_signature_header(header: &str) -> Option<(i64, String)> {
    let mut timestamp = None;
    let mut signature = None;
    for part in header.split(',') {
        let (key, value) = part.trim().split_once('=')?;
        match key {
            "t" => timestamp = value.parse::<i64>().ok(),
            "v1" => signature = Some(value.to_string()),
            _ => {}
        }
    }
    Some((timestamp?, signature?))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Compute a valid `Stripe-Signature` header value for a payload. Used by
/// tests and by local webhook replay tooling.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC-SHA256 accepts any key size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;
    use std::collections::HashMap;

    fn adapter() -> Box<dyn PaymentAdapter> {
        new_adapter(AdapterConfig {
            org_id: 1,
            provider: "stripe".to_string(),
            config: HashMap::from([(
                "webhook_secret".to_string(),
                json!("whsec_test"),
            )]),
        })
        .unwrap()
    }

    fn now_secs() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    fn signed_headers(payload: &[u8]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let value = sign_payload("whsec_test", now_secs(), payload);
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(&value).unwrap());
        headers
    }

    fn payment_payload() -> Vec<u8> {
        json!({
            "id": "evt_123",
            "type": "invoice.payment_succeeded",
            "data": {"object": {
                "id": "in_123",
                "amount": 650,
                "currency": "usd",
                "created": 1735776000,
                "metadata": {"customer_id": "42", "invoice_id": "77"}
            }}
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn missing_secret_fails_construction() {
        let err = new_adapter(AdapterConfig {
            org_id: 1,
            provider: "stripe".to_string(),
            config: HashMap::new(),
        })
        .err()
        .unwrap();
        assert!(matches!(err, BillingError::InvalidConfig));
    }

    #[test]
    fn verify_accepts_a_correctly_signed_payload() {
        let payload = payment_payload();
        let headers = signed_headers(&payload);
        assert!(adapter().verify(&payload, &headers).is_ok());
    }

    #[test]
    fn verify_rejects_a_tampered_payload() {
        let payload = payment_payload();
        let headers = signed_headers(&payload);
        let mut tampered = payload.clone();
        tampered[0] ^= 1;
        assert!(matches!(
            adapter().verify(&tampered, &headers),
            Err(BillingError::InvalidSignature)
        ));
    }

    #[test]
    fn verify_rejects_missing_or_malformed_headers() {
        let payload = payment_payload();
        assert!(matches!(
            adapter().verify(&payload, &HeaderMap::new()),
            Err(BillingError::InvalidSignature)
        ));

        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_static("garbage"));
        assert!(matches!(
            adapter().verify(&payload, &headers),
            Err(BillingError::InvalidSignature)
        ));
    }

    #[test]
    fn verify_rejects_stale_timestamps() {
        let payload = payment_payload();
        let stale = sign_payload("whsec_test", now_secs() - 3600, &payload);
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(&stale).unwrap());
        assert!(matches!(
            adapter().verify(&payload, &headers),
            Err(BillingError::InvalidSignature)
        ));
    }

    #[test]
    fn parses_payment_succeeded() {
        let parsed = adapter().parse(&payment_payload()).unwrap();
        let ParsedEvent::Payment(event) = parsed else {
            panic!("expected payment event");
        };
        assert_eq!(event.provider_event_id, "evt_123");
        assert_eq!(event.event_type, payment_event_types::PAYMENT_SUCCEEDED);
        assert_eq!(event.customer_id, 42);
        assert_eq!(event.amount, 650);
        assert_eq!(event.invoice_id, Some(77));
    }

    #[test]
    fn parses_dispute_funds_withdrawn() {
        let payload = json!({
            "id": "evt_d1",
            "type": "charge.dispute.funds_withdrawn",
            "data": {"object": {
                "id": "dp_9",
                "amount": 500,
                "currency": "usd",
                "created": 1735776000,
                "reason": "fraudulent",
                "metadata": {"customer_id": "42"}
            }}
        })
        .to_string()
        .into_bytes();

        let ParsedEvent::Dispute(event) = adapter().parse(&payload).unwrap() else {
            panic!("expected dispute event");
        };
        assert_eq!(event.provider_dispute_id, "dp_9");
        assert_eq!(event.event_type, dispute_event_types::FUNDS_WITHDRAWN);
        assert_eq!(event.reason.as_deref(), Some("fraudulent"));
    }

    #[test]
    fn unknown_event_types_are_ignored() {
        let payload = json!({
            "id": "evt_x",
            "type": "customer.created",
            "data": {"object": {"id": "cus_1"}}
        })
        .to_string()
        .into_bytes();
        assert!(matches!(
            adapter().parse(&payload),
            Err(BillingError::EventIgnored)
        ));
    }

    #[test]
    fn invalid_json_is_an_invalid_payload() {
        assert!(matches!(
            adapter().parse(b"not json"),
            Err(BillingError::InvalidPayload)
        ));
    }
}
