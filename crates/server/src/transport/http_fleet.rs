// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fleet, registration, and token handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use legator_protocol::{KeyRotation, MessageType};

use crate::audit::AuditEvent;
use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::events::Event;
use crate::fleet::{generate_probe_key, InventoryFilter, TokenError};
use crate::policy::CapabilityLevel;
use crate::state::{AppState, VERSION};
use crate::storage::StoreError;

/// Audit actor for a request: the authenticated identity or `anonymous`.
pub fn actor(ctx: &Option<Extension<AuthContext>>) -> String {
    ctx.as_ref().map(|c| c.actor.clone()).unwrap_or_else(|| "anonymous".to_owned())
}

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthzResponse {
    pub status: String,
    pub probes: usize,
    pub connected: usize,
}

#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub token: String,
    #[serde(default)]
    pub probe_id: Option<String>,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub arch: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub probe_id: String,
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
pub struct SetTagsRequest {
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RotateKeyResponse {
    pub probe_id: String,
    pub api_key: String,
    /// Whether the rotation frame reached the live session.
    pub delivered: bool,
}

#[derive(Debug, Deserialize)]
pub struct CleanupRequest {
    /// Probes unseen for this long are deleted. Defaults to 7 days.
    #[serde(default)]
    pub older_than_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub removed: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTokenRequest {
    /// Override the configured token time-to-live, in seconds.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /healthz`
pub async fn healthz(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    let counts = s.fleet.count().await;
    Json(HealthzResponse {
        status: "ok".to_owned(),
        probes: counts.values().sum(),
        connected: s.hub.connected_count().await,
    })
}

/// `GET /version`
pub async fn version() -> impl IntoResponse {
    Json(VersionResponse { name: "legator".to_owned(), version: VERSION.to_owned() })
}

/// `POST /api/v1/register` — probe self-registration, consuming a one-shot
/// token.
pub async fn register_probe(
    State(s): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> impl IntoResponse {
    if let Err(e) = s.fleet.consume_token(&req.token) {
        let message = match e {
            TokenError::Unknown => "unknown registration token",
            TokenError::Used => "registration token already used",
            TokenError::Expired => "registration token expired",
            TokenError::Store(_) => "registration unavailable",
        };
        s.audit.record(
            AuditEvent::new("probe.register_denied", "anonymous", message)
                .with_detail(serde_json::json!({ "reason": message })),
        );
        return ApiError::Unauthorized.to_response(message).into_response();
    }

    let probe_id = req.probe_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    match s
        .fleet
        .register(&probe_id, &req.hostname, &req.os, &req.arch, CapabilityLevel::Observe)
        .await
    {
        Ok(api_key) => {
            s.audit.emit(
                "probe.registered",
                Some(&probe_id),
                "anonymous",
                format!("probe {probe_id} registered ({})", req.hostname),
            );
            s.bus.publish(Event::for_probe("probe.registered", &probe_id));
            Json(RegisterResponse { probe_id, api_key }).into_response()
        }
        Err(StoreError::Conflict(_)) => {
            ApiError::Conflict.to_response("probe id already registered").into_response()
        }
        Err(e) => {
            tracing::error!(err = %e, "probe registration failed");
            ApiError::Internal.to_response("registration failed").into_response()
        }
    }
}

/// `GET /api/v1/probes`
pub async fn list_probes(
    State(s): State<Arc<AppState>>,
    Query(filter): Query<InventoryFilter>,
) -> impl IntoResponse {
    if filter.tag.is_some() || filter.os.is_some() || filter.arch.is_some() {
        return Json(s.fleet.inventory(&filter).await).into_response();
    }
    Json(s.fleet.list().await).into_response()
}

/// `GET /api/v1/probes/{id}`
pub async fn get_probe(
    State(s): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match s.fleet.get(&id).await {
        Some(probe) => Json(probe).into_response(),
        None => ApiError::NotFound.to_response("unknown probe").into_response(),
    }
}

/// `GET /api/v1/probes/{id}/health`
pub async fn probe_health(
    State(s): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match s.fleet.get(&id).await {
        Some(probe) => match probe.health {
            Some(health) => Json(health).into_response(),
            None => ApiError::NotFound.to_response("no heartbeat received yet").into_response(),
        },
        None => ApiError::NotFound.to_response("unknown probe").into_response(),
    }
}

/// `GET /api/v1/inventory`
pub async fn inventory(
    State(s): State<Arc<AppState>>,
    Query(filter): Query<InventoryFilter>,
) -> impl IntoResponse {
    Json(s.fleet.inventory(&filter).await)
}

/// `GET /api/v1/fleet/tags`
pub async fn tag_counts(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    Json(s.fleet.tag_counts().await)
}

/// `DELETE /api/v1/probes/{id}`
pub async fn delete_probe(
    State(s): State<Arc<AppState>>,
    ctx: Option<Extension<AuthContext>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match s.fleet.delete(&id).await {
        Ok(()) => {
            s.audit.emit("probe.deleted", Some(&id), &actor(&ctx), format!("probe {id} deleted"));
            s.bus.publish(Event::for_probe("probe.deleted", &id));
            Json(serde_json::json!({ "deleted": id })).into_response()
        }
        Err(StoreError::NotFound) => {
            ApiError::NotFound.to_response("unknown probe").into_response()
        }
        Err(e) => {
            tracing::error!(probe_id = %id, err = %e, "probe delete failed");
            ApiError::Internal.to_response("delete failed").into_response()
        }
    }
}

/// `POST /api/v1/probes/{id}/tags`
pub async fn set_tags(
    State(s): State<Arc<AppState>>,
    ctx: Option<Extension<AuthContext>>,
    Path(id): Path<String>,
    Json(req): Json<SetTagsRequest>,
) -> impl IntoResponse {
    match s.fleet.set_tags(&id, &req.tags).await {
        Ok(tags) => {
            s.audit.record(
                AuditEvent::new("probe.tags_updated", actor(&ctx), format!("tags set on {id}"))
                    .probe(&id)
                    .with_detail(serde_json::json!({ "tags": tags })),
            );
            Json(serde_json::json!({ "probe_id": id, "tags": tags })).into_response()
        }
        Err(StoreError::NotFound) => {
            ApiError::NotFound.to_response("unknown probe").into_response()
        }
        Err(e) => {
            tracing::error!(probe_id = %id, err = %e, "set tags failed");
            ApiError::Internal.to_response("set tags failed").into_response()
        }
    }
}

/// `POST /api/v1/probes/{id}/rotate-key` — rotate the probe api key and push
/// the new key down the live session when there is one.
pub async fn rotate_key(
    State(s): State<Arc<AppState>>,
    ctx: Option<Extension<AuthContext>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if s.fleet.get(&id).await.is_none() {
        return ApiError::NotFound.to_response("unknown probe").into_response();
    }

    let new_key = generate_probe_key();
    if let Err(e) = s.fleet.set_api_key(&id, &new_key).await {
        tracing::error!(probe_id = %id, err = %e, "key rotation persist failed");
        return ApiError::Internal.to_response("rotation failed").into_response();
    }

    let delivered = s
        .hub
        .send_to(&id, MessageType::KeyRotation, &KeyRotation { new_key: new_key.clone() })
        .await
        .is_ok();

    s.audit.record(
        AuditEvent::new("probe.key_rotated", actor(&ctx), format!("api key rotated for {id}"))
            .probe(&id)
            .with_detail(serde_json::json!({ "delivered": delivered })),
    );
    s.bus.publish(Event::for_probe("probe.key_rotated", &id));
    Json(RotateKeyResponse { probe_id: id, api_key: new_key, delivered }).into_response()
}

/// `POST /api/v1/fleet/cleanup`
pub async fn cleanup_offline(
    State(s): State<Arc<AppState>>,
    ctx: Option<Extension<AuthContext>>,
    Json(req): Json<CleanupRequest>,
) -> impl IntoResponse {
    let threshold = std::time::Duration::from_secs(req.older_than_secs.unwrap_or(7 * 24 * 3600));
    let removed = s.fleet.cleanup_offline(threshold).await;
    for id in &removed {
        s.bus.publish(Event::for_probe("probe.deleted", id));
    }
    if !removed.is_empty() {
        s.audit.record(
            AuditEvent::new(
                "fleet.cleanup",
                actor(&ctx),
                format!("removed {} offline probes", removed.len()),
            )
            .with_detail(serde_json::json!({ "removed": removed })),
        );
    }
    Json(CleanupResponse { removed }).into_response()
}

/// `POST /api/v1/tokens`
pub async fn create_token(
    State(s): State<Arc<AppState>>,
    ctx: Option<Extension<AuthContext>>,
    Json(req): Json<CreateTokenRequest>,
) -> impl IntoResponse {
    let ttl = req
        .ttl_secs
        .map(std::time::Duration::from_secs)
        .unwrap_or_else(|| s.config.token_ttl());
    match s.fleet.create_token(ttl) {
        Ok(token) => {
            s.audit.emit("token.created", None, &actor(&ctx), "registration token created");
            Json(token).into_response()
        }
        Err(e) => {
            tracing::error!(err = %e, "token creation failed");
            ApiError::Internal.to_response("token creation failed").into_response()
        }
    }
}

/// `GET /api/v1/tokens`
pub async fn list_tokens(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    match s.fleet.list_tokens() {
        Ok(tokens) => Json(tokens).into_response(),
        Err(e) => {
            tracing::error!(err = %e, "token listing failed");
            ApiError::Internal.to_response("token listing failed").into_response()
        }
    }
}
