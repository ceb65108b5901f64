// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command dispatch handlers and per-request output streaming.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Deserializer};
use tokio_util::sync::CancellationToken;

use legator_protocol::CommandRequest;

use crate::audit::AuditEvent;
use crate::auth::AuthContext;
use crate::dispatch::{wait_timeout_for, DispatchError, DispatchOutcome, DispatchPolicy};
use crate::error::ApiError;
use crate::policy::{evaluate, PolicyOutcome};
use crate::state::AppState;
use crate::transport::http_fleet::actor;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CommandBody {
    #[serde(default)]
    pub request_id: Option<String>,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub level: Option<String>,
    /// Accepts `"2s"`, `"500ms"`, `"1m"`, or a bare number of seconds.
    #[serde(default, deserialize_with = "deserialize_timeout")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct CommandQuery {
    #[serde(default)]
    pub wait: Option<bool>,
    #[serde(default)]
    pub stream: Option<bool>,
}

fn deserialize_timeout<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }
    match Option::<Raw>::deserialize(d)? {
        None => Ok(None),
        Some(Raw::Secs(n)) => Ok(Some(n)),
        Some(Raw::Text(text)) => parse_duration_secs(&text)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid duration: {text}"))),
    }
}

/// Parse `"30"`, `"30s"`, `"5m"`, or `"1500ms"` into whole seconds.
fn parse_duration_secs(text: &str) -> Option<u64> {
    let text = text.trim();
    if let Ok(n) = text.parse::<u64>() {
        return Some(n);
    }
    if let Some(ms) = text.strip_suffix("ms") {
        let ms: u64 = ms.parse().ok()?;
        return Some(ms.div_ceil(1000));
    }
    if let Some(s) = text.strip_suffix('s') {
        return s.parse().ok();
    }
    if let Some(m) = text.strip_suffix('m') {
        let m: u64 = m.parse().ok()?;
        return Some(m * 60);
    }
    None
}

// -- Handlers -----------------------------------------------------------------

/// `POST /api/v1/probes/{id}/command?wait=&stream=`
pub async fn dispatch_command(
    State(s): State<Arc<AppState>>,
    ctx: Option<Extension<AuthContext>>,
    Path(id): Path<String>,
    Query(query): Query<CommandQuery>,
    Json(body): Json<CommandBody>,
) -> impl IntoResponse {
    if body.command.trim().is_empty() {
        return ApiError::InvalidRequest.to_response("command must not be empty").into_response();
    }

    let Some(probe) = s.fleet.get(&id).await else {
        return ApiError::NotFound.to_response("unknown probe").into_response();
    };

    let template = match probe.policy_template {
        Some(ref template_id) => s.policies.get(template_id).ok(),
        None => None,
    };

    let requested_by = actor(&ctx);
    let level_str = body.level.clone().unwrap_or_else(|| probe.policy_level.as_str().to_owned());
    let decision = evaluate(&body.command, &body.args, probe.policy_level, template.as_ref());

    match decision.outcome {
        PolicyOutcome::Deny => {
            s.audit.record(
                AuditEvent::new(
                    "command.denied",
                    &requested_by,
                    format!("`{}` denied by policy on {id}", body.command),
                )
                .probe(&id)
                .with_detail(serde_json::json!({
                    "outcome": "deny",
                    "risk_level": decision.risk_level.as_str(),
                    "rationale": decision.rationale,
                })),
            );
            return ApiError::Forbidden.to_response(decision.rationale).into_response();
        }
        PolicyOutcome::Queue => {
            let command = wire_command(&body, &level_str, query.stream);
            let request = s.approvals.submit(
                &id,
                command,
                &decision.rationale,
                decision.risk_level,
                probe.policy_level,
                &requested_by,
            );
            return (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({
                    "status": "pending_approval",
                    "approval_id": request.id,
                    "risk_level": decision.risk_level.as_str(),
                    "rationale": decision.rationale,
                })),
            )
                .into_response();
        }
        PolicyOutcome::Allow => {}
    }

    let command = wire_command(&body, &level_str, query.stream);
    let policy = if query.wait.unwrap_or(false) {
        DispatchPolicy::Wait { timeout: wait_timeout_for(&command, s.config.command_wait_timeout()) }
    } else {
        DispatchPolicy::DispatchOnly
    };

    let outcome = s
        .dispatcher
        .dispatch_with_policy(
            &CancellationToken::new(),
            &id,
            command,
            probe.policy_level,
            policy,
            &requested_by,
        )
        .await;
    project_outcome(outcome).into_response()
}

fn wire_command(body: &CommandBody, level: &str, stream: Option<bool>) -> CommandRequest {
    CommandRequest {
        request_id: body.request_id.clone().unwrap_or_default(),
        command: body.command.clone(),
        args: body.args.clone(),
        level: level.to_owned(),
        timeout: body.timeout.unwrap_or(0),
        stream: stream.unwrap_or(false),
    }
}

/// Map the dispatcher envelope to HTTP. Other surfaces project the same
/// envelope with their own renderings.
fn project_outcome(outcome: DispatchOutcome) -> axum::response::Response {
    match outcome.err {
        None => match outcome.result {
            Some(result) => Json(result).into_response(),
            None => (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({
                    "request_id": outcome.request_id,
                    "dispatched": outcome.dispatched,
                })),
            )
                .into_response(),
        },
        Some(DispatchError::NotConnected) => {
            ApiError::BadGateway.to_response("probe not connected").into_response()
        }
        Some(DispatchError::Transport(msg)) => ApiError::BadGateway.to_response(msg).into_response(),
        Some(DispatchError::Timeout) => {
            ApiError::Timeout.to_response("timed out waiting for command result").into_response()
        }
        Some(DispatchError::Duplicate) => {
            ApiError::Conflict.to_response("request id already in flight").into_response()
        }
        // The caller is gone; nothing useful can be written.
        Some(DispatchError::Cancelled) => StatusCode::GATEWAY_TIMEOUT.into_response(),
    }
}

/// `GET /api/v1/commands/pending`
pub async fn list_pending(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    Json(s.tracker.list_pending())
}

/// `GET /api/v1/commands/{request_id}/stream` — SSE feed of output chunks
/// until the final chunk arrives or the client goes away.
pub async fn stream_output(
    State(s): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> impl IntoResponse {
    let subscription = s.hub.streams().subscribe(&request_id, 64);

    let chunks = subscription.map(|chunk| {
        Ok::<SseEvent, std::convert::Infallible>(
            SseEvent::default()
                .event("output_chunk")
                .data(serde_json::to_string(&chunk).unwrap_or_default()),
        )
    });
    let connected = stream::once(async { Ok(SseEvent::default().comment("connected")) });

    Sse::new(connected.chain(chunks))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keep-alive"))
}
