// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket + SSE transport for the control plane.

pub mod http_approvals;
pub mod http_audit;
pub mod http_auth;
pub mod http_commands;
pub mod http_fleet;
pub mod http_webhooks;
pub mod metrics;
pub mod sse;
pub mod ws;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::middleware::{auth_context_layer, body_limit_layer, permission_guard, MAX_BODY_BYTES};
use crate::auth::Permission;
use crate::state::AppState;

/// Build the axum `Router` with all control-plane routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let public = Router::new()
        .route("/healthz", get(http_fleet::healthz))
        .route("/version", get(http_fleet::version))
        .route("/api/v1/register", post(http_fleet::register_probe))
        .route("/api/v1/auth/login", post(http_auth::login))
        .route("/api/v1/auth/logout", post(http_auth::logout))
        .route("/api/v1/auth/me", get(http_auth::me))
        .route("/ws/probe", get(ws::probe_session_handler));

    let fleet_read = Router::new()
        .route("/api/v1/probes", get(http_fleet::list_probes))
        .route("/api/v1/probes/{id}", get(http_fleet::get_probe))
        .route("/api/v1/probes/{id}/health", get(http_fleet::probe_health))
        .route("/api/v1/inventory", get(http_fleet::inventory))
        .route("/api/v1/fleet/tags", get(http_fleet::tag_counts))
        .route("/api/v1/policies", get(http_auth::list_policies))
        .route("/api/v1/policies/{id}", get(http_auth::get_policy))
        .route("/api/v1/events", get(sse::events_stream))
        .route("/api/v1/metrics", get(metrics::metrics))
        .route_layer(middleware::from_fn_with_state(
            (Arc::clone(&state), Permission::FleetRead),
            permission_guard,
        ));

    let fleet_write = Router::new()
        .route("/api/v1/tokens", get(http_fleet::list_tokens).post(http_fleet::create_token))
        .route("/api/v1/probes/{id}", delete(http_fleet::delete_probe))
        .route("/api/v1/probes/{id}/tags", post(http_fleet::set_tags))
        .route("/api/v1/probes/{id}/rotate-key", post(http_fleet::rotate_key))
        .route("/api/v1/fleet/cleanup", post(http_fleet::cleanup_offline))
        .route_layer(middleware::from_fn_with_state(
            (Arc::clone(&state), Permission::FleetWrite),
            permission_guard,
        ));

    let command_exec = Router::new()
        .route("/api/v1/probes/{id}/command", post(http_commands::dispatch_command))
        .route("/api/v1/commands/pending", get(http_commands::list_pending))
        .route("/api/v1/commands/{request_id}/stream", get(http_commands::stream_output))
        .route_layer(middleware::from_fn_with_state(
            (Arc::clone(&state), Permission::CommandExec),
            permission_guard,
        ));

    let approval_read = Router::new()
        .route("/api/v1/approvals", get(http_approvals::list_approvals))
        .route("/api/v1/approvals/{id}", get(http_approvals::get_approval))
        .route_layer(middleware::from_fn_with_state(
            (Arc::clone(&state), Permission::ApprovalRead),
            permission_guard,
        ));

    let approval_write = Router::new()
        .route("/api/v1/approvals/{id}/decide", post(http_approvals::decide_approval))
        .route_layer(middleware::from_fn_with_state(
            (Arc::clone(&state), Permission::ApprovalWrite),
            permission_guard,
        ));

    let audit_read = Router::new()
        .route("/api/v1/audit", get(http_audit::query_audit))
        .route("/api/v1/audit/export", get(http_audit::export_jsonl))
        .route("/api/v1/audit/export.csv", get(http_audit::export_csv))
        .route_layer(middleware::from_fn_with_state(
            (Arc::clone(&state), Permission::AuditRead),
            permission_guard,
        ));

    let webhook_manage = Router::new()
        .route(
            "/api/v1/webhooks",
            get(http_webhooks::list_webhooks).post(http_webhooks::create_webhook),
        )
        .route("/api/v1/webhooks/{id}", delete(http_webhooks::delete_webhook))
        .route("/api/v1/webhooks/{id}/enable", post(http_webhooks::enable_webhook))
        .route_layer(middleware::from_fn_with_state(
            (Arc::clone(&state), Permission::WebhookManage),
            permission_guard,
        ));

    let admin = Router::new()
        .route("/api/v1/audit/purge", delete(http_audit::purge_audit))
        .route("/api/v1/policies", post(http_auth::create_policy))
        .route(
            "/api/v1/policies/{id}",
            put(http_auth::update_policy).delete(http_auth::delete_policy),
        )
        .route("/api/v1/policies/{id}/push/{probe_id}", post(http_auth::push_policy))
        .route("/api/v1/users", get(http_auth::list_users).post(http_auth::create_user))
        .route("/api/v1/users/{id}", delete(http_auth::delete_user))
        .route("/api/v1/apikeys", get(http_auth::list_apikeys).post(http_auth::create_apikey))
        .route("/api/v1/apikeys/{id}", delete(http_auth::delete_apikey))
        .route_layer(middleware::from_fn_with_state(
            (Arc::clone(&state), Permission::Admin),
            permission_guard,
        ));

    Router::new()
        .merge(public)
        .merge(fleet_read)
        .merge(fleet_write)
        .merge(command_exec)
        .merge(approval_read)
        .merge(approval_write)
        .merge(audit_read)
        .merge(webhook_manage)
        .merge(admin)
        .layer(middleware::from_fn(body_limit_layer))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES as usize))
        .layer(middleware::from_fn_with_state(Arc::clone(&state), auth_context_layer))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
