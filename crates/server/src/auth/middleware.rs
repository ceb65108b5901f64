// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request authentication and permission gating.
//!
//! `auth_context_layer` runs on every request and materialises an
//! [`AuthContext`] from an API key or session cookie. `permission_guard` is
//! layered per route and enforces one required permission, auditing every
//! denial.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::audit::AuditEvent;
use crate::auth::apikeys::KeyRejection;
use crate::auth::{AuthContext, Credential, Permission};
use crate::error::ApiError;
use crate::state::AppState;

/// Session cookie name.
pub const SESSION_COOKIE: &str = "legator_session";

/// Maximum accepted request body on write methods.
pub const MAX_BODY_BYTES: u64 = 1024 * 1024;

/// Extract the bearer token from an Authorization header.
fn bearer_token(req: &Request<Body>) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Extract the session cookie value.
fn session_cookie(req: &Request<Body>) -> Option<String> {
    let cookies = req.headers().get(header::COOKIE)?.to_str().ok()?;
    for pair in cookies.split(';') {
        if let Some(value) = pair.trim().strip_prefix(&format!("{SESSION_COOKIE}=")) {
            return Some(value.to_owned());
        }
    }
    None
}

/// Global middleware: resolve credentials into an [`AuthContext`] extension.
///
/// Requests without credentials pass through unauthenticated; the permission
/// guard decides whether that matters. A *presented* operator key that fails
/// validation is rejected here (and audited) so a typo never degrades into an
/// anonymous request. Probe bearer tokens (`pk_...`) are not operator keys
/// and fall through to the WebSocket handler's own check.
pub async fn auth_context_layer(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(token) = bearer_token(&req).map(str::to_owned) {
        if token.starts_with("lg_") {
            let Some(ref keys) = state.api_keys else {
                return ApiError::Unauthorized.to_response("api keys not configured").into_response();
            };
            match keys.validate(&token) {
                Ok(validated) => {
                    if !state.rate_limiter.check(&validated.id) {
                        return ApiError::RateLimited
                            .to_response("rate limit exceeded")
                            .into_response();
                    }
                    // Usage stamp happens off the request path.
                    let keys = Arc::clone(keys);
                    let key_id = validated.id.clone();
                    tokio::spawn(async move { keys.touch_last_used(&key_id) });

                    req.extensions_mut().insert(AuthContext {
                        actor: validated.name,
                        credential: Credential::ApiKey { key_id: validated.id },
                        permissions: validated.permissions,
                        extra_grants: validated.extra_grants,
                    });
                }
                Err(rejection) => {
                    let reason = match rejection {
                        KeyRejection::Unknown => "unknown_key",
                        KeyRejection::Disabled => "key_disabled",
                        KeyRejection::Expired => "key_expired",
                    };
                    state.audit.record(
                        AuditEvent::new("auth.login_failed", "anonymous", "api key rejected")
                            .with_detail(serde_json::json!({ "reason": reason })),
                    );
                    return ApiError::Unauthorized.to_response("invalid api key").into_response();
                }
            }
        }
    } else if let Some(cookie) = session_cookie(&req) {
        if let (Some(sessions), Some(users)) = (&state.sessions, &state.users) {
            if let Some(user_id) = sessions.validate(&cookie) {
                match users.get(&user_id) {
                    Ok(user) if user.enabled => {
                        req.extensions_mut().insert(AuthContext {
                            actor: user.username.clone(),
                            credential: Credential::Session { user_id: user.id },
                            permissions: user.role.permissions(),
                            extra_grants: vec![],
                        });
                    }
                    _ => {
                        // Disabled or deleted user: the session dies with it.
                        sessions.delete(&cookie);
                    }
                }
            }
        }
    }

    next.run(req).await
}

/// Per-route permission gate, layered as
/// `middleware::from_fn_with_state((state, perm), permission_guard)`.
pub async fn permission_guard(
    State((state, perm)): State<(Arc<AppState>, Permission)>,
    req: Request<Body>,
    next: Next,
) -> Response {
    // Nothing to enforce when no credential channel is configured.
    if !state.auth_configured() {
        return next.run(req).await;
    }

    let path = req.uri().path().to_owned();
    let Some(ctx) = req.extensions().get::<AuthContext>() else {
        state.audit.record(
            AuditEvent::new("auth.authorization_denied", "anonymous", "authentication required")
                .with_detail(serde_json::json!({
                    "path": path,
                    "required_permission": perm.as_str(),
                    "reason": "authentication_required",
                })),
        );
        return ApiError::Unauthorized.to_response("authentication required").into_response();
    };

    if !ctx.allows(perm) {
        state.audit.record(
            AuditEvent::new("auth.authorization_denied", &ctx.actor, "insufficient permissions")
                .with_detail(serde_json::json!({
                    "path": path,
                    "required_permission": perm.as_str(),
                    "reason": "insufficient_permissions",
                })),
        );
        return ApiError::Forbidden
            .to_response(format!("requires {}", perm.as_str()))
            .into_response();
    }

    next.run(req).await
}

/// Reject declared write bodies over [`MAX_BODY_BYTES`]. A body of exactly
/// the limit passes. `DefaultBodyLimit` backstops chunked payloads that never
/// declare a length.
pub async fn body_limit_layer(req: Request<Body>, next: Next) -> Response {
    let is_write = matches!(req.method().as_str(), "POST" | "PUT" | "PATCH");
    if is_write {
        let declared = req
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if let Some(len) = declared {
            if len > MAX_BODY_BYTES {
                return ApiError::RequestTooLarge
                    .to_response("request body exceeds 1 MiB")
                    .into_response();
            }
        }
    }

    let response = next.run(req).await;
    // DefaultBodyLimit surfaces as a bare 413; normalise to the standard body.
    if response.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::RequestTooLarge.to_response("request body exceeds 1 MiB").into_response();
    }
    response
}
