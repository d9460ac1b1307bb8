//! Provider-config encryption.
//!
//! Stored configs are AES-256-GCM sealed under a key derived as
//! `SHA256(master_secret)`. The stored shape is
//! `{version: 1, nonce: base64-raw, ciphertext: base64-raw}`.

use crate::error::BillingError;
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

const PAYLOAD_VERSION: i32 = 1;
const NONCE_LEN: usize = 12;

#[derive(Debug, Serialize, Deserialize)]
struct EncryptedPayload {
    version: i32,
    nonce: String,
    ciphertext: String,
}

/// Derive the 32-byte sealing key from the master secret.
pub fn derive_key(master_secret: &str) -> Option<[u8; 32]> {
    let secret = master_secret.trim();
    if secret.is_empty() {
        return None;
    }
    Some(Sha256::digest(secret.as_bytes()).into())
}

/// Decrypt a stored provider config into its key/value map. Any parse or
/// decrypt failure is `invalid_config`; a missing key is
/// `encryption_key_missing`.
pub fn decrypt_config(
    key: Option<&[u8; 32]>,
    stored: &Value,
) -> Result<HashMap<String, Value>, BillingError> {
    let key = key.ok_or(BillingError::EncryptionKeyMissing)?;

    let payload: EncryptedPayload =
        serde_json::from_value(stored.clone()).map_err(|_| BillingError::InvalidConfig)?;
    if payload.version != PAYLOAD_VERSION {
        return Err(BillingError::InvalidConfig);
    }

    let nonce = STANDARD_NO_PAD
        .decode(&payload.nonce)
        .map_err(|_| BillingError::InvalidConfig)?;
    if nonce.len() != NONCE_LEN {
        return Err(BillingError::InvalidConfig);
    }
    let ciphertext = STANDARD_NO_PAD
        .decode(&payload.ciphertext)
        .map_err(|_| BillingError::InvalidConfig)?;

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| BillingError::InvalidConfig)?;
    let plain = cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
        .map_err(|_| BillingError::InvalidConfig)?;

    let out: HashMap<String, Value> =
        serde_json::from_slice(&plain).map_err(|_| BillingError::InvalidConfig)?;
    if out.is_empty() {
        return Err(BillingError::InvalidConfig);
    }
    Ok(out)
}

/// Seal a provider config. Used by config management and test fixtures.
pub fn encrypt_config(
    key: Option<&[u8; 32]>,
    config: &HashMap<String, Value>,
) -> Result<Value, BillingError> {
    let key = key.ok_or(BillingError::EncryptionKeyMissing)?;
    if config.is_empty() {
        return Err(BillingError::InvalidConfig);
    }

    let plain = serde_json::to_vec(config).map_err(|_| BillingError::InvalidConfig)?;

    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| BillingError::InvalidConfig)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plain.as_ref())
        .map_err(|_| BillingError::InvalidConfig)?;

    let payload = EncryptedPayload {
        version: PAYLOAD_VERSION,
        nonce: STANDARD_NO_PAD.encode(nonce),
        ciphertext: STANDARD_NO_PAD.encode(ciphertext),
    };
    serde_json::to_value(payload).map_err(|_| BillingError::InvalidConfig)
}
