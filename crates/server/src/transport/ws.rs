// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Probe session transport: WebSocket upgrade, auth, and the session loop.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use legator_protocol::Envelope;

use crate::state::AppState;

/// How long a closing session keeps draining queued outbound frames.
const CLOSE_DRAIN: Duration = Duration::from_secs(1);

/// Query parameters for the probe session upgrade.
#[derive(Debug, Deserialize)]
pub struct ProbeWsQuery {
    pub id: String,
    /// Bearer token; the Authorization header is also accepted.
    #[serde(default)]
    pub token: Option<String>,
}

/// `GET /ws/probe?id=...` — WebSocket upgrade for a probe session.
///
/// The bearer token must equal the probe's stored api key. Authentication
/// failure rejects before the upgrade acknowledgement.
pub async fn probe_session_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProbeWsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = query.token.clone().or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_owned)
    });

    let authenticated = match token {
        Some(presented) => state.probe_auth.authenticate(&query.id, &presented).await,
        None => false,
    };
    if !authenticated {
        state.audit.emit(
            "auth.login_failed",
            Some(&query.id),
            "probe",
            format!("probe session auth failed for {}", query.id),
        );
        return axum::http::Response::builder()
            .status(401)
            .body(axum::body::Body::from("unauthorized"))
            .unwrap_or_default()
            .into_response();
    }

    let probe_id = query.id;
    ws.on_upgrade(move |socket| run_session(state, socket, probe_id)).into_response()
}

/// Per-session loop. Owns the transport exclusively: outbound frames come
/// from the hub queue, inbound frames go to the router.
async fn run_session(state: Arc<AppState>, socket: WebSocket, probe_id: String) {
    let (conn, mut outbound_rx) = state.hub.connect(&probe_id).await;
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            _ = conn.cancel.cancelled() => {
                // Drain what is already queued, bounded, then close.
                let drain = async {
                    while let Ok(env) = outbound_rx.try_recv() {
                        if let Ok(json) = serde_json::to_string(&env) {
                            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                };
                let _ = tokio::time::timeout(CLOSE_DRAIN, drain).await;
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }

            env = outbound_rx.recv() => {
                match env {
                    Some(env) => {
                        let json = match serde_json::to_string(&env) {
                            Ok(json) => json,
                            Err(e) => {
                                tracing::warn!(probe_id = %probe_id, err = %e, "outbound frame serialisation failed");
                                continue;
                            }
                        };
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<Envelope>(&text) {
                            Ok(envelope) => state.router.route(&probe_id, envelope).await,
                            Err(e) => {
                                tracing::debug!(probe_id = %probe_id, err = %e, "unparseable probe frame");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(probe_id = %probe_id, err = %e, "probe session read error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    state.hub.disconnect(&conn).await;
}
