// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HMAC-SHA256 envelope signing.
//!
//! The control plane signs every outbound envelope when a signing key is
//! configured; probes verify before acting. The signature is base64 over
//! `HMAC-SHA256(key, canonical_bytes)`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ring::hmac;

use crate::envelope::Envelope;
use crate::ProtocolError;

/// Minimum signing key length in bytes.
pub const MIN_KEY_BYTES: usize = 32;

/// Envelope signer/verifier. Immutable after construction.
pub struct Signer {
    key: hmac::Key,
}

impl Signer {
    /// Build a signer from raw key material. Keys under 32 bytes are rejected.
    pub fn new(key: &[u8]) -> Result<Self, ProtocolError> {
        if key.len() < MIN_KEY_BYTES {
            return Err(ProtocolError::KeyTooShort(key.len()));
        }
        Ok(Self { key: hmac::Key::new(hmac::HMAC_SHA256, key) })
    }

    /// Compute the signature for an envelope (ignores any existing signature).
    pub fn sign(&self, envelope: &Envelope) -> Result<String, ProtocolError> {
        let bytes = envelope.canonical_bytes()?;
        let tag = hmac::sign(&self.key, &bytes);
        Ok(BASE64.encode(tag.as_ref()))
    }

    /// Verify an envelope's signature. Unsigned envelopes fail verification.
    pub fn verify(&self, envelope: &Envelope) -> bool {
        let Some(ref sig) = envelope.signature else {
            return false;
        };
        let Ok(sig_bytes) = BASE64.decode(sig) else {
            return false;
        };
        let Ok(bytes) = envelope.canonical_bytes() else {
            return false;
        };
        hmac::verify(&self.key, &bytes, &sig_bytes).is_ok()
    }
}

/// Decode a hex signing key string. Requires at least 64 hex chars (32 bytes).
pub fn decode_signing_key(hex_str: &str) -> Result<Vec<u8>, ProtocolError> {
    let trimmed = hex_str.trim();
    if trimmed.len() < MIN_KEY_BYTES * 2 {
        return Err(ProtocolError::BadKeyHex(format!(
            "{} hex chars (minimum {})",
            trimmed.len(),
            MIN_KEY_BYTES * 2
        )));
    }
    hex::decode(trimmed).map_err(|e| ProtocolError::BadKeyHex(e.to_string()))
}

/// Generate a fresh 32-byte signing key, returned as hex.
pub fn generate_signing_key() -> Result<String, ProtocolError> {
    let mut key = [0u8; MIN_KEY_BYTES];
    let rng = ring::rand::SystemRandom::new();
    ring::rand::SecureRandom::fill(&rng, &mut key).map_err(|_| ProtocolError::Rng)?;
    Ok(hex::encode(key))
}

#[cfg(test)]
#[path = "sign_tests.rs"]
mod tests;
