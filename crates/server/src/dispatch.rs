// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command dispatch.
//!
//! The dispatcher is surface-agnostic: it returns a [`DispatchOutcome`]
//! envelope and the HTTP layer (or any other transport) projects it. Errors
//! keep their source kind so every surface renders the same taxonomy.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use legator_protocol::{CommandRequest, CommandResult, MessageType};

use crate::audit::{AuditEvent, AuditStore};
use crate::events::{Event, EventBus};
use crate::hub::{Hub, SendOutcome};
use crate::policy::CapabilityLevel;
use crate::tracker::{next_request_id, CommandTracker, TrackerError};

/// How to dispatch.
#[derive(Debug, Clone, Copy)]
pub enum DispatchPolicy {
    /// Fire and forget: send the frame, do not wait for a result.
    DispatchOnly,
    /// Send and wait for the probe's result up to the timeout.
    Wait { timeout: Duration },
}

/// Dispatch errors, kept structured for surface projections.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error("probe not connected")]
    NotConnected,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out waiting for command result")]
    Timeout,

    /// The caller went away; the HTTP renderer suppresses the body.
    #[error("request cancelled")]
    Cancelled,

    #[error("request id already in flight")]
    Duplicate,
}

/// Surface-agnostic dispatch envelope.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub request_id: String,
    pub dispatched: bool,
    pub result: Option<CommandResult>,
    pub err: Option<DispatchError>,
}

impl DispatchOutcome {
    fn failed(request_id: String, err: DispatchError) -> Self {
        Self { request_id, dispatched: false, result: None, err: Some(err) }
    }
}

/// Effective wait timeout: the command's own timeout plus slack, or the
/// server default when the command sets none.
pub fn wait_timeout_for(cmd: &CommandRequest, default: Duration) -> Duration {
    if cmd.timeout > 0 {
        Duration::from_secs(cmd.timeout) + Duration::from_secs(5)
    } else {
        default.max(Duration::from_secs(35))
    }
}

pub struct Dispatcher {
    hub: Arc<Hub>,
    tracker: Arc<CommandTracker>,
    audit: Arc<AuditStore>,
    bus: Arc<EventBus>,
}

impl Dispatcher {
    pub fn new(
        hub: Arc<Hub>,
        tracker: Arc<CommandTracker>,
        audit: Arc<AuditStore>,
        bus: Arc<EventBus>,
    ) -> Arc<Self> {
        Arc::new(Self { hub, tracker, audit, bus })
    }

    /// Dispatch `cmd` to `probe_id` under `policy`. Assigns a request id when
    /// the caller left it blank. `cancel` aborts a `Wait` early.
    pub async fn dispatch_with_policy(
        &self,
        cancel: &CancellationToken,
        probe_id: &str,
        mut cmd: CommandRequest,
        level: CapabilityLevel,
        policy: DispatchPolicy,
        actor: &str,
    ) -> DispatchOutcome {
        if cmd.request_id.is_empty() {
            cmd.request_id = next_request_id();
        }
        let request_id = cmd.request_id.clone();

        let wait_rx = match policy {
            DispatchPolicy::DispatchOnly => None,
            DispatchPolicy::Wait { .. } => {
                match self.tracker.track(&request_id, probe_id, &cmd.command, level) {
                    Ok(rx) => Some(rx),
                    Err(TrackerError::Duplicate(_)) => {
                        return DispatchOutcome::failed(request_id, DispatchError::Duplicate);
                    }
                }
            }
        };

        match self.hub.send_to(probe_id, MessageType::Command, &cmd).await {
            SendOutcome::Ok => {}
            SendOutcome::NotConnected => {
                self.tracker.cancel(&request_id);
                return DispatchOutcome::failed(request_id, DispatchError::NotConnected);
            }
            SendOutcome::TransportErr(msg) => {
                self.tracker.cancel(&request_id);
                return DispatchOutcome::failed(request_id, DispatchError::Transport(msg));
            }
        }

        self.audit.record(
            AuditEvent::new("command.sent", actor, format!("sent `{}` to {probe_id}", cmd.command))
                .probe(probe_id)
                .with_detail(serde_json::json!({
                    "request_id": request_id,
                    "level": level.as_str(),
                    "stream": cmd.stream,
                })),
        );
        self.bus.publish(
            Event::for_probe("command.sent", probe_id)
                .with_data(serde_json::json!({ "request_id": request_id })),
        );

        let Some(rx) = wait_rx else {
            return DispatchOutcome { request_id, dispatched: true, result: None, err: None };
        };
        let DispatchPolicy::Wait { timeout } = policy else {
            return DispatchOutcome { request_id, dispatched: true, result: None, err: None };
        };

        tokio::select! {
            result = rx => match result {
                Ok(result) => DispatchOutcome {
                    request_id,
                    dispatched: true,
                    result: Some(result),
                    err: None,
                },
                // Channel closed without a result: tracker entry was
                // cancelled or swept.
                Err(_) => DispatchOutcome {
                    request_id,
                    dispatched: true,
                    result: None,
                    err: Some(DispatchError::Timeout),
                },
            },
            _ = cancel.cancelled() => {
                self.tracker.cancel(&request_id);
                DispatchOutcome {
                    request_id,
                    dispatched: true,
                    result: None,
                    err: Some(DispatchError::Cancelled),
                }
            }
            _ = tokio::time::sleep(timeout) => {
                self.tracker.cancel(&request_id);
                DispatchOutcome {
                    request_id,
                    dispatched: true,
                    result: None,
                    err: Some(DispatchError::Timeout),
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
