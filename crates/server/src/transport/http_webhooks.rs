// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Webhook target handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Deserialize;

use crate::audit::AuditEvent;
use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::state::AppState;
use crate::storage::StoreError;
use crate::transport::http_fleet::actor;

// -- Request types ------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateWebhookRequest {
    pub url: String,
    /// Forward only events whose type starts with this prefix.
    #[serde(default)]
    pub event_prefix: String,
}

#[derive(Debug, Deserialize)]
pub struct EnableWebhookRequest {
    pub enabled: bool,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/v1/webhooks`
pub async fn list_webhooks(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    match s.webhooks.list() {
        Ok(targets) => Json(targets).into_response(),
        Err(e) => {
            tracing::error!(err = %e, "webhook listing failed");
            ApiError::Internal.to_response("webhook listing failed").into_response()
        }
    }
}

/// `POST /api/v1/webhooks`
pub async fn create_webhook(
    State(s): State<Arc<AppState>>,
    ctx: Option<Extension<AuthContext>>,
    Json(req): Json<CreateWebhookRequest>,
) -> impl IntoResponse {
    if !req.url.starts_with("http://") && !req.url.starts_with("https://") {
        return ApiError::InvalidRequest
            .to_response("url must start with http:// or https://")
            .into_response();
    }

    match s.webhooks.create(&req.url, req.event_prefix.trim()) {
        Ok(target) => {
            s.audit.record(
                AuditEvent::new(
                    "webhook.created",
                    actor(&ctx),
                    format!("webhook target {} created", target.url),
                )
                .with_detail(serde_json::json!({
                    "webhook_id": target.id,
                    "event_prefix": target.event_prefix,
                })),
            );
            Json(target).into_response()
        }
        Err(e) => {
            tracing::error!(err = %e, "webhook creation failed");
            ApiError::Internal.to_response("webhook creation failed").into_response()
        }
    }
}

/// `POST /api/v1/webhooks/{id}/enable`
pub async fn enable_webhook(
    State(s): State<Arc<AppState>>,
    ctx: Option<Extension<AuthContext>>,
    Path(id): Path<String>,
    Json(req): Json<EnableWebhookRequest>,
) -> impl IntoResponse {
    match s.webhooks.set_enabled(&id, req.enabled) {
        Ok(()) => {
            s.audit.emit(
                "webhook.updated",
                None,
                &actor(&ctx),
                format!("webhook {id} {}", if req.enabled { "enabled" } else { "disabled" }),
            );
            Json(serde_json::json!({ "webhook_id": id, "enabled": req.enabled })).into_response()
        }
        Err(StoreError::NotFound) => {
            ApiError::NotFound.to_response("unknown webhook").into_response()
        }
        Err(e) => {
            tracing::error!(err = %e, "webhook update failed");
            ApiError::Internal.to_response("webhook update failed").into_response()
        }
    }
}

/// `DELETE /api/v1/webhooks/{id}`
pub async fn delete_webhook(
    State(s): State<Arc<AppState>>,
    ctx: Option<Extension<AuthContext>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match s.webhooks.delete(&id) {
        Ok(()) => {
            s.audit.emit("webhook.deleted", None, &actor(&ctx), format!("webhook {id} deleted"));
            StatusCode::NO_CONTENT.into_response()
        }
        Err(StoreError::NotFound) => {
            ApiError::NotFound.to_response("unknown webhook").into_response()
        }
        Err(e) => {
            tracing::error!(err = %e, "webhook delete failed");
            ApiError::Internal.to_response("webhook delete failed").into_response()
        }
    }
}
