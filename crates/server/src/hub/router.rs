// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound message router.
//!
//! Every frame a probe sends while its session is open lands here. The
//! router updates the fleet, completes pending commands, and fans output
//! chunks out to stream subscribers.

use std::sync::Arc;

use legator_protocol::{CommandResult, Envelope, Heartbeat, Inventory, MessageType, OutputChunk};

use crate::audit::AuditStore;
use crate::events::{Event, EventBus};
use crate::fleet::FleetRegistry;
use crate::hub::streams::StreamRegistry;
use crate::tracker::CommandTracker;

pub struct MessageRouter {
    fleet: Arc<FleetRegistry>,
    tracker: Arc<CommandTracker>,
    streams: Arc<StreamRegistry>,
    audit: Arc<AuditStore>,
    bus: Arc<EventBus>,
}

impl MessageRouter {
    pub fn new(
        fleet: Arc<FleetRegistry>,
        tracker: Arc<CommandTracker>,
        streams: Arc<StreamRegistry>,
        audit: Arc<AuditStore>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self { fleet, tracker, streams, audit, bus }
    }

    /// Route one inbound envelope from `session_probe_id`'s open session.
    pub async fn route(&self, session_probe_id: &str, envelope: Envelope) {
        match envelope.msg_type {
            MessageType::Heartbeat => self.on_heartbeat(&envelope).await,
            MessageType::Inventory => self.on_inventory(&envelope).await,
            MessageType::CommandResult => self.on_result(&envelope).await,
            MessageType::OutputChunk => self.on_chunk(&envelope).await,
            other => {
                tracing::debug!(
                    probe_id = session_probe_id,
                    msg_type = other.as_str(),
                    "ignoring unexpected inbound message type"
                );
            }
        }
    }

    async fn on_heartbeat(&self, envelope: &Envelope) {
        let hb: Heartbeat = match envelope.parse_payload() {
            Ok(hb) => hb,
            Err(e) => {
                tracing::debug!(err = %e, "malformed heartbeat payload");
                return;
            }
        };

        match self.fleet.heartbeat(&hb).await {
            Ok(true) => {
                // Token may have been consumed while the registration reply
                // was lost; a heartbeat from an unknown probe re-creates a
                // minimal row.
                self.audit.emit(
                    "probe.registered",
                    Some(&hb.probe_id),
                    "system",
                    format!("probe {} auto-registered from heartbeat", hb.probe_id),
                );
                self.bus.publish(Event::for_probe("probe.registered", &hb.probe_id));
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(probe_id = %hb.probe_id, err = %e, "heartbeat update failed");
            }
        }
    }

    async fn on_inventory(&self, envelope: &Envelope) {
        let inv: Inventory = match envelope.parse_payload() {
            Ok(inv) => inv,
            Err(e) => {
                tracing::debug!(err = %e, "malformed inventory payload");
                return;
            }
        };
        if let Err(e) = self.fleet.update_inventory(&inv).await {
            tracing::warn!(probe_id = %inv.probe_id, err = %e, "inventory update failed");
        }
    }

    async fn on_result(&self, envelope: &Envelope) {
        let result: CommandResult = match envelope.parse_payload() {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(err = %e, "malformed command_result payload");
                return;
            }
        };
        let request_id = result.request_id.clone();
        let exit_code = result.exit_code;
        if self.tracker.complete(&request_id, result) {
            self.bus.publish(
                Event::new("command.completed")
                    .with_data(serde_json::json!({ "request_id": request_id, "exit_code": exit_code })),
            );
        }
    }

    async fn on_chunk(&self, envelope: &Envelope) {
        let chunk: OutputChunk = match envelope.parse_payload() {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(err = %e, "malformed output_chunk payload");
                return;
            }
        };
        self.streams.dispatch(&chunk);

        // The terminal chunk also completes the tracker so a waiter blocked
        // on the result channel resolves without a separate command_result.
        if chunk.is_final {
            let synthesised = CommandResult {
                request_id: chunk.request_id.clone(),
                exit_code: chunk.exit_code.unwrap_or(0),
                stdout: String::new(),
                stderr: String::new(),
                duration_ms: 0,
            };
            if self.tracker.complete(&chunk.request_id, synthesised) {
                self.bus.publish(Event::new("command.completed").with_data(serde_json::json!({
                    "request_id": chunk.request_id,
                    "exit_code": chunk.exit_code,
                    "streamed": true,
                })));
            }
        }
    }
}
