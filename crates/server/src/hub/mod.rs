// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Probe session hub.
//!
//! Tracks the single active session per probe and gives the rest of the
//! control plane one way to push frames: [`Hub::send_to`]. Each session owns
//! a bounded outbound queue drained by one writer task, so concurrent callers
//! never interleave bytes on the wire.

pub mod router;
pub mod streams;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use legator_protocol::{Envelope, MessageType, Signer};

use crate::hub::streams::StreamRegistry;

/// Outbound queue depth per probe session.
const OUTBOUND_QUEUE: usize = 64;

/// Result of a `send_to` attempt.
#[derive(Debug)]
pub enum SendOutcome {
    Ok,
    NotConnected,
    TransportErr(String),
}

impl SendOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Session lifecycle transitions, consumed by the fleet-side hook task.
#[derive(Debug, Clone)]
pub enum SessionTransition {
    Connected { probe_id: String, reconnect: bool },
    Disconnected { probe_id: String },
}

/// Authenticates a probe's bearer token. Pluggable so tests and alternate
/// credential backends can swap the fleet-backed implementation out.
pub trait ProbeAuthenticator: Send + Sync {
    fn authenticate<'a>(
        &'a self,
        probe_id: &'a str,
        bearer_token: &'a str,
    ) -> futures_util::future::BoxFuture<'a, bool>;
}

/// Default authenticator: the token must equal the probe's stored api key.
pub struct FleetAuthenticator {
    fleet: Arc<crate::fleet::FleetRegistry>,
}

impl FleetAuthenticator {
    pub fn new(fleet: Arc<crate::fleet::FleetRegistry>) -> Arc<Self> {
        Arc::new(Self { fleet })
    }
}

impl ProbeAuthenticator for FleetAuthenticator {
    fn authenticate<'a>(
        &'a self,
        probe_id: &'a str,
        bearer_token: &'a str,
    ) -> futures_util::future::BoxFuture<'a, bool> {
        Box::pin(async move {
            match self.fleet.api_key(probe_id).await {
                // Constant-time comparison; token checks must not leak match
                // position through timing.
                Some(expected) => ring::constant_time::verify_slices_are_equal(
                    bearer_token.as_bytes(),
                    expected.as_bytes(),
                )
                .is_ok(),
                None => false,
            }
        })
    }
}

/// One active probe session.
pub struct ProbeConn {
    pub probe_id: String,
    outbound: mpsc::Sender<Envelope>,
    pub cancel: CancellationToken,
    generation: u64,
}

pub struct Hub {
    connections: RwLock<HashMap<String, Arc<ProbeConn>>>,
    signer: Option<Signer>,
    streams: Arc<StreamRegistry>,
    lifecycle_tx: mpsc::UnboundedSender<SessionTransition>,
    generations: AtomicU64,
}

impl Hub {
    /// Build the hub. The returned receiver delivers lifecycle transitions;
    /// the startup wiring drains it into fleet updates and bus events.
    pub fn new(signer: Option<Signer>) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionTransition>) {
        let (lifecycle_tx, lifecycle_rx) = mpsc::unbounded_channel();
        let hub = Arc::new(Self {
            connections: RwLock::new(HashMap::new()),
            signer,
            streams: Arc::new(StreamRegistry::new()),
            lifecycle_tx,
            generations: AtomicU64::new(1),
        });
        (hub, lifecycle_rx)
    }

    /// Output-chunk fan-out registry.
    pub fn streams(&self) -> Arc<StreamRegistry> {
        Arc::clone(&self.streams)
    }

    /// Install a new session for `probe_id`, replacing any existing one.
    ///
    /// Returns the connection handle and the outbound frame queue the writer
    /// task must drain. A replaced session is cancelled without a
    /// `Disconnected` transition: the probe never left, its old transport did.
    pub async fn connect(&self, probe_id: &str) -> (Arc<ProbeConn>, mpsc::Receiver<Envelope>) {
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let conn = Arc::new(ProbeConn {
            probe_id: probe_id.to_owned(),
            outbound,
            cancel: CancellationToken::new(),
            generation: self.generations.fetch_add(1, Ordering::Relaxed),
        });

        let replaced = {
            let mut conns = self.connections.write().await;
            conns.insert(probe_id.to_owned(), Arc::clone(&conn))
        };
        let reconnect = match replaced {
            Some(old) => {
                old.cancel.cancel();
                true
            }
            None => false,
        };

        let _ = self.lifecycle_tx.send(SessionTransition::Connected {
            probe_id: probe_id.to_owned(),
            reconnect,
        });
        (conn, outbound_rx)
    }

    /// Tear down a session. Only the generation that is still registered
    /// fires the `Disconnected` transition, so a session replaced mid-flight
    /// cannot report its probe offline.
    pub async fn disconnect(&self, conn: &ProbeConn) {
        let removed = {
            let mut conns = self.connections.write().await;
            match conns.get(&conn.probe_id) {
                Some(current) if current.generation == conn.generation => {
                    conns.remove(&conn.probe_id);
                    true
                }
                _ => false,
            }
        };
        conn.cancel.cancel();
        if removed {
            let _ = self.lifecycle_tx.send(SessionTransition::Disconnected {
                probe_id: conn.probe_id.clone(),
            });
        }
    }

    /// Whether a probe has an active session.
    pub async fn is_connected(&self, probe_id: &str) -> bool {
        self.connections.read().await.contains_key(probe_id)
    }

    pub async fn connected_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Serialise a payload into a signed envelope and queue it on the probe's
    /// writer. Never blocks: a full outbound queue is a transport error.
    pub async fn send_to<P: Serialize>(
        &self,
        probe_id: &str,
        msg_type: MessageType,
        payload: &P,
    ) -> SendOutcome {
        let conn = {
            let conns = self.connections.read().await;
            match conns.get(probe_id) {
                Some(c) => Arc::clone(c),
                None => return SendOutcome::NotConnected,
            }
        };

        let mut envelope = match Envelope::new(msg_type, payload) {
            Ok(env) => env,
            Err(e) => return SendOutcome::TransportErr(e.to_string()),
        };
        if let Some(ref signer) = self.signer {
            match signer.sign(&envelope) {
                Ok(sig) => envelope.signature = Some(sig),
                Err(e) => return SendOutcome::TransportErr(format!("signing failed: {e}")),
            }
        }

        match conn.outbound.try_send(envelope) {
            Ok(()) => SendOutcome::Ok,
            Err(mpsc::error::TrySendError::Full(_)) => {
                SendOutcome::TransportErr("outbound queue full".to_owned())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::NotConnected,
        }
    }
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
