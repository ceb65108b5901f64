// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Envelope and payload types for probe session frames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

// -- Message types ------------------------------------------------------------

/// Message type tag carried in every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Heartbeat,
    Inventory,
    Command,
    CommandResult,
    OutputChunk,
    PolicyUpdate,
    KeyRotation,
    Update,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heartbeat => "heartbeat",
            Self::Inventory => "inventory",
            Self::Command => "command",
            Self::CommandResult => "command_result",
            Self::OutputChunk => "output_chunk",
            Self::PolicyUpdate => "policy_update",
            Self::KeyRotation => "key_rotation",
            Self::Update => "update",
        }
    }
}

// -- Envelope -----------------------------------------------------------------

/// One framed message on the probe channel.
///
/// The `signature` field, when present, covers the canonical serialisation of
/// `(id, type, timestamp, payload)` — field order as declared here, payload
/// object keys sorted (serde_json's default map ordering).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// The signed portion of an envelope. Field order is the canonical order.
#[derive(Serialize)]
struct CanonicalEnvelope<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    msg_type: MessageType,
    timestamp: &'a DateTime<Utc>,
    payload: &'a serde_json::Value,
}

impl Envelope {
    /// Build an unsigned envelope around a serialisable payload.
    pub fn new<P: Serialize>(msg_type: MessageType, payload: &P) -> Result<Self, ProtocolError> {
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            msg_type,
            timestamp: Utc::now(),
            payload: serde_json::to_value(payload)?,
            signature: None,
        })
    }

    /// Canonical bytes covered by the signature (everything except `signature`).
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let canonical = CanonicalEnvelope {
            id: &self.id,
            msg_type: self.msg_type,
            timestamp: &self.timestamp,
            payload: &self.payload,
        };
        Ok(serde_json::to_vec(&canonical)?)
    }

    /// Deserialise the payload into a concrete type.
    pub fn parse_payload<P: for<'de> Deserialize<'de>>(&self) -> Result<P, ProtocolError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

// -- Payloads -----------------------------------------------------------------

/// Periodic probe liveness report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub probe_id: String,
    /// Seconds since probe start.
    #[serde(default)]
    pub uptime: u64,
    /// 1/5/15-minute load averages.
    #[serde(default)]
    pub load: [f64; 3],
    #[serde(default)]
    pub mem_used: u64,
    #[serde(default)]
    pub mem_total: u64,
    #[serde(default)]
    pub disk_used: u64,
    #[serde(default)]
    pub disk_total: u64,
}

/// Host inventory, sent on connect and on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inventory {
    pub probe_id: String,
    pub hostname: String,
    pub os: String,
    pub arch: String,
    #[serde(default)]
    pub kernel: String,
    #[serde(default)]
    pub cpus: u32,
    #[serde(default)]
    pub mem_total_bytes: u64,
    #[serde(default)]
    pub disk_total_bytes: u64,
}

/// Command pushed from the control plane to a probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub request_id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub level: String,
    /// Execution timeout in seconds. Zero means the probe default.
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub stream: bool,
}

/// Terminal result of a command execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub request_id: String,
    pub exit_code: i32,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub duration_ms: u64,
}

/// Which output stream a chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Incremental command output while `stream=true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputChunk {
    pub request_id: String,
    pub stream: OutputStream,
    pub data: String,
    pub seq: u64,
    #[serde(rename = "final", default)]
    pub is_final: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// Policy pushed to a probe after an operator edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyUpdate {
    pub level: String,
    #[serde(default)]
    pub allowed_commands: Vec<String>,
    #[serde(default)]
    pub blocked_commands: Vec<String>,
    #[serde(default)]
    pub allowed_paths: Vec<String>,
}

/// API key rotation pushed to a probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRotation {
    pub new_key: String,
}

/// Probe software update notice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateNotice {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
