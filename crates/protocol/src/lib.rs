// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire protocol for the probe channel.
//!
//! Every frame on a probe session is one JSON [`Envelope`]. The envelope
//! carries a message type tag, a free-form payload, and an optional HMAC
//! signature over the canonical serialisation (see [`sign`]).

pub mod envelope;
pub mod sign;

pub use envelope::{
    CommandRequest, CommandResult, Envelope, Heartbeat, Inventory, KeyRotation, MessageType,
    OutputChunk, OutputStream, PolicyUpdate, UpdateNotice,
};
pub use sign::{decode_signing_key, generate_signing_key, Signer};

use thiserror::Error;

/// Errors produced by envelope construction and signing.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Signing key is shorter than the 32-byte minimum.
    #[error("signing key too short: {0} bytes (minimum 32)")]
    KeyTooShort(usize),

    /// Signing key hex string is malformed or too short.
    #[error("invalid signing key hex: {0}")]
    BadKeyHex(String),

    /// Payload could not be serialised.
    #[error("payload serialisation failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// System randomness was unavailable for key generation.
    #[error("system rng unavailable")]
    Rng,
}
