//! HMAC-SHA256 verification of Close webhook signatures.
//!
//! Close signs each delivery with the key of the subscription it belongs to:
//! - Signature is computed over: `{close-sig-timestamp}{raw body}`
//! - The key is the hex-decoded subscription signature key
//! - The signature is the lowercase hex HMAC-SHA256 digest, sent in `close-sig-hash`
//!
//! A request that merely fails to verify yields `Ok(false)`. Only an unusable key store or key
//! yields an error, so misconfiguration is never mistaken for a forged request.

use std::collections::HashMap;

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use tracing::error;

use crate::config::SIGNATURE_KEYS_ENV;
use crate::errors::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex signature.
pub const SIGNATURE_HASH_HEADER: &str = "close-sig-hash";

/// Header carrying the signing timestamp (unix seconds, as text).
pub const SIGNATURE_TIMESTAMP_HEADER: &str = "close-sig-timestamp";

/// The two signature headers of a delivery. Empty values count as missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureHeaders {
    pub hash: Option<String>,
    pub timestamp: Option<String>,
}

impl SignatureHeaders {
    pub fn new(hash: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            hash: Some(hash.into()),
            timestamp: Some(timestamp.into()),
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        Self {
            hash: get(SIGNATURE_HASH_HEADER),
            timestamp: get(SIGNATURE_TIMESTAMP_HEADER),
        }
    }
}

/// Resolves a subscription id to its hex signature key.
///
/// `Ok(None)` means the store is usable but has no key for this subscription. An unusable
/// store is an [`Error::Configuration`].
pub trait SecretLookup: Send + Sync {
    fn lookup(&self, subscription_id: &str) -> Result<Option<String>>;
}

/// Signature keys as configured: the raw JSON text of a `{subscription_id: hex_key}` object.
///
/// The text is parsed on every lookup, so a malformed value is reported by the request that
/// needed it rather than at startup.
#[derive(Debug, Clone, Default)]
pub struct SignatureKeys {
    raw: Option<String>,
}

impl SignatureKeys {
    pub fn new(raw: Option<String>) -> Self {
        Self { raw }
    }
}

impl SecretLookup for SignatureKeys {
    fn lookup(&self, subscription_id: &str) -> Result<Option<String>> {
        let raw = self
            .raw
            .as_deref()
            .ok_or_else(|| Error::configuration(format!("{SIGNATURE_KEYS_ENV} setting not set.")))?;

        let keys: Value = serde_json::from_str(raw)
            .map_err(|e| Error::configuration(format!("Cannot load value of {SIGNATURE_KEYS_ENV} to json: {e}")))?;

        let Value::Object(keys) = keys else {
            return Err(Error::configuration(format!(
                "Parsed value of {SIGNATURE_KEYS_ENV} is expected to be a dictionary."
            )));
        };

        match keys.get(subscription_id) {
            None => Ok(None),
            Some(Value::String(key)) => Ok(Some(key.clone())),
            Some(_) => Err(Error::configuration(format!(
                "The signature key for subscription {subscription_id} in {SIGNATURE_KEYS_ENV} must be a string."
            ))),
        }
    }
}

impl SecretLookup for HashMap<String, String> {
    fn lookup(&self, subscription_id: &str) -> Result<Option<String>> {
        Ok(self.get(subscription_id).cloned())
    }
}

/// Compute the signature Close would send for `body` at `timestamp`.
///
/// Fails with [`Error::Configuration`] when `hex_key` is not valid hexadecimal.
pub fn sign_payload(timestamp: &str, body: &[u8], hex_key: &str) -> Result<String> {
    let key = hex::decode(hex_key).map_err(|_| {
        Error::configuration(
            "The signature key for a Closeio webhook subscription must be a valid string from a hexadecimal number.",
        )
    })?;

    let mut mac = HmacSha256::new_from_slice(&key).map_err(|e| Error::configuration(format!("Unusable signature key: {e}")))?;
    mac.update(timestamp.as_bytes());
    mac.update(body);

    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a webhook delivery.
///
/// Malformed JSON and missing correlation data are rejected before any key material is touched.
///
/// # Returns
///
/// `Ok(true)` if the signature matches, `Ok(false)` if the request is not authentic, and an
/// [`Error::Configuration`] when the key store or the subscription's key is unusable.
pub fn verify(raw_body: &[u8], headers: &SignatureHeaders, keys: &dyn SecretLookup) -> Result<bool> {
    let Ok(payload) = serde_json::from_slice::<Value>(raw_body) else {
        return Ok(false);
    };

    let Some(subscription_id) = payload.get("subscription_id").and_then(Value::as_str).filter(|id| !id.is_empty()) else {
        return Ok(false);
    };

    let Some(key) = keys.lookup(subscription_id)? else {
        error!(subscription_id, "No signature key set for Closeio webhook subscription");
        return Ok(false);
    };

    let (Some(hash), Some(timestamp)) = (&headers.hash, &headers.timestamp) else {
        return Ok(false);
    };

    let expected = sign_payload(timestamp, raw_body, &key)?;

    // Use constant-time comparison to prevent timing attacks
    Ok(constant_time_eq(hash.as_bytes(), expected.as_bytes()))
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
