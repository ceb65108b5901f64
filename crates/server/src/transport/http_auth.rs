// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Login, user, API key, and policy template handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use legator_protocol::{MessageType, PolicyUpdate};

use crate::audit::AuditEvent;
use crate::auth::middleware::SESSION_COOKIE;
use crate::auth::users::LoginRejection;
use crate::auth::{AuthContext, Credential, Role};
use crate::error::ApiError;
use crate::events::Event;
use crate::policy::{CapabilityLevel, PolicyTemplate};
use crate::state::AppState;
use crate::storage::StoreError;
use crate::transport::http_fleet::actor;

// -- Request types ------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    pub password: String,
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateApiKeyRequest {
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct PolicyBody {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub level: String,
    #[serde(default)]
    pub allowed_commands: Vec<String>,
    #[serde(default)]
    pub blocked_commands: Vec<String>,
    #[serde(default)]
    pub allowed_paths: Vec<String>,
}

fn session_cookie_header(value: &str, max_age_secs: i64) -> String {
    format!("{SESSION_COOKIE}={value}; Path=/; HttpOnly; SameSite=Strict; Max-Age={max_age_secs}")
}

// -- Session handlers ---------------------------------------------------------

/// `POST /api/v1/auth/login`
pub async fn login(
    State(s): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> impl IntoResponse {
    let (Some(users), Some(sessions)) = (&s.users, &s.sessions) else {
        return ApiError::ServiceUnavailable.to_response("logins not configured").into_response();
    };

    match users.verify_login(&req.username, &req.password) {
        Ok(user) => {
            let session_id = match sessions.create(&user.id) {
                Ok(id) => id,
                Err(e) => {
                    tracing::error!(err = %e, "session creation failed");
                    return ApiError::Internal.to_response("login failed").into_response();
                }
            };
            s.audit.emit("auth.login", None, &user.username, "login succeeded");
            (
                [(header::SET_COOKIE, session_cookie_header(&session_id, 7 * 24 * 3600))],
                Json(user),
            )
                .into_response()
        }
        Err(rejection) => {
            let reason = match rejection {
                LoginRejection::UnknownUser => "unknown_user",
                LoginRejection::BadPassword => "bad_password",
                LoginRejection::Disabled => "user_disabled",
            };
            s.audit.record(
                AuditEvent::new("auth.login_failed", &req.username, "login failed")
                    .with_detail(serde_json::json!({ "reason": reason })),
            );
            ApiError::Unauthorized.to_response("invalid credentials").into_response()
        }
    }
}

/// `POST /api/v1/auth/logout`
pub async fn logout(
    State(s): State<Arc<AppState>>,
    ctx: Option<Extension<AuthContext>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Some(sessions) = &s.sessions {
        if let Some(cookie) = headers
            .get(header::COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|cookies| {
                cookies.split(';').find_map(|pair| {
                    pair.trim().strip_prefix(&format!("{SESSION_COOKIE}=")).map(str::to_owned)
                })
            })
        {
            sessions.delete(&cookie);
        }
    }
    if let Some(ctx) = ctx {
        s.audit.emit("auth.logout", None, &ctx.actor, "logout");
    }
    ([(header::SET_COOKIE, session_cookie_header("", 0))], StatusCode::NO_CONTENT)
}

/// `GET /api/v1/auth/me`
pub async fn me(
    State(s): State<Arc<AppState>>,
    ctx: Option<Extension<AuthContext>>,
) -> impl IntoResponse {
    let Some(ctx) = ctx else {
        return ApiError::Unauthorized.to_response("authentication required").into_response();
    };
    let permissions: Vec<&str> = ctx.permissions.iter().map(|p| p.as_str()).collect();
    let credential = match ctx.credential {
        Credential::ApiKey { .. } => "api_key",
        Credential::Session { .. } => "session",
    };
    Json(serde_json::json!({
        "actor": ctx.actor,
        "credential": credential,
        "permissions": permissions,
    }))
    .into_response()
}

// -- User handlers ------------------------------------------------------------

/// `GET /api/v1/users`
pub async fn list_users(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    let Some(users) = &s.users else {
        return ApiError::ServiceUnavailable.to_response("users not configured").into_response();
    };
    match users.list() {
        Ok(list) => Json(list).into_response(),
        Err(e) => {
            tracing::error!(err = %e, "user listing failed");
            ApiError::Internal.to_response("user listing failed").into_response()
        }
    }
}

/// `POST /api/v1/users`
pub async fn create_user(
    State(s): State<Arc<AppState>>,
    ctx: Option<Extension<AuthContext>>,
    Json(req): Json<CreateUserRequest>,
) -> impl IntoResponse {
    let Some(users) = &s.users else {
        return ApiError::ServiceUnavailable.to_response("users not configured").into_response();
    };
    let Some(role) = Role::parse(&req.role) else {
        return ApiError::InvalidRequest
            .to_response(format!("unknown role: {}", req.role))
            .into_response();
    };
    if req.username.trim().is_empty() || req.password.len() < 8 {
        return ApiError::InvalidRequest
            .to_response("username required and password must be at least 8 chars")
            .into_response();
    }

    match users.create(&req.username, &req.display_name, &req.password, role) {
        Ok(user) => {
            s.audit.emit(
                "user.created",
                None,
                &actor(&ctx),
                format!("user {} created with role {}", user.username, role.as_str()),
            );
            Json(user).into_response()
        }
        Err(StoreError::Conflict(_)) => {
            ApiError::Conflict.to_response("username already exists").into_response()
        }
        Err(e) => {
            tracing::error!(err = %e, "user creation failed");
            ApiError::Internal.to_response("user creation failed").into_response()
        }
    }
}

/// `DELETE /api/v1/users/{id}`
pub async fn delete_user(
    State(s): State<Arc<AppState>>,
    ctx: Option<Extension<AuthContext>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Some(users) = &s.users else {
        return ApiError::ServiceUnavailable.to_response("users not configured").into_response();
    };
    match users.delete(&id) {
        Ok(()) => {
            if let Some(sessions) = &s.sessions {
                sessions.delete_for_user(&id);
            }
            s.audit.emit("user.deleted", None, &actor(&ctx), format!("user {id} deleted"));
            StatusCode::NO_CONTENT.into_response()
        }
        Err(StoreError::NotFound) => ApiError::NotFound.to_response("unknown user").into_response(),
        Err(e) => {
            tracing::error!(err = %e, "user delete failed");
            ApiError::Internal.to_response("user delete failed").into_response()
        }
    }
}

// -- API key handlers ---------------------------------------------------------

/// `GET /api/v1/apikeys`
pub async fn list_apikeys(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    let Some(keys) = &s.api_keys else {
        return ApiError::ServiceUnavailable.to_response("api keys not configured").into_response();
    };
    match keys.list() {
        Ok(list) => Json(list).into_response(),
        Err(e) => {
            tracing::error!(err = %e, "api key listing failed");
            ApiError::Internal.to_response("api key listing failed").into_response()
        }
    }
}

/// `POST /api/v1/apikeys` — the plaintext appears in this response only.
pub async fn create_apikey(
    State(s): State<Arc<AppState>>,
    ctx: Option<Extension<AuthContext>>,
    Json(req): Json<CreateApiKeyRequest>,
) -> impl IntoResponse {
    let Some(keys) = &s.api_keys else {
        return ApiError::ServiceUnavailable.to_response("api keys not configured").into_response();
    };
    for perm in &req.permissions {
        let known = crate::auth::Permission::parse(perm).is_some()
            || perm.starts_with("tenant:")
            || perm.starts_with("org:")
            || perm.starts_with("scope:")
            || perm.starts_with("federation:");
        if !known {
            return ApiError::InvalidRequest
                .to_response(format!("unknown permission: {perm}"))
                .into_response();
        }
    }

    match keys.create(&req.name, &req.permissions, req.expires_at) {
        Ok((info, plaintext)) => {
            s.audit.record(
                AuditEvent::new("apikey.created", actor(&ctx), format!("api key {} created", info.name))
                    .with_detail(serde_json::json!({ "key_id": info.id, "permissions": info.permissions })),
            );
            Json(serde_json::json!({ "key": info, "plaintext": plaintext })).into_response()
        }
        Err(StoreError::Conflict(_)) => {
            ApiError::Conflict.to_response("api key name already exists").into_response()
        }
        Err(e) => {
            tracing::error!(err = %e, "api key creation failed");
            ApiError::Internal.to_response("api key creation failed").into_response()
        }
    }
}

/// `DELETE /api/v1/apikeys/{id}`
pub async fn delete_apikey(
    State(s): State<Arc<AppState>>,
    ctx: Option<Extension<AuthContext>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Some(keys) = &s.api_keys else {
        return ApiError::ServiceUnavailable.to_response("api keys not configured").into_response();
    };
    match keys.delete(&id) {
        Ok(()) => {
            s.audit.emit("apikey.deleted", None, &actor(&ctx), format!("api key {id} deleted"));
            StatusCode::NO_CONTENT.into_response()
        }
        Err(StoreError::NotFound) => {
            ApiError::NotFound.to_response("unknown api key").into_response()
        }
        Err(e) => {
            tracing::error!(err = %e, "api key delete failed");
            ApiError::Internal.to_response("api key delete failed").into_response()
        }
    }
}

// -- Policy template handlers -------------------------------------------------

fn template_from_body(id: String, body: PolicyBody) -> Result<PolicyTemplate, ApiError> {
    let Some(level) = CapabilityLevel::parse(&body.level) else {
        return Err(ApiError::InvalidRequest);
    };
    Ok(PolicyTemplate {
        id,
        name: body.name,
        description: body.description,
        level,
        allowed_commands: body.allowed_commands,
        blocked_commands: body.blocked_commands,
        allowed_paths: body.allowed_paths,
    })
}

/// `GET /api/v1/policies`
pub async fn list_policies(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    match s.policies.list() {
        Ok(list) => Json(list).into_response(),
        Err(e) => {
            tracing::error!(err = %e, "policy listing failed");
            ApiError::Internal.to_response("policy listing failed").into_response()
        }
    }
}

/// `GET /api/v1/policies/{id}`
pub async fn get_policy(
    State(s): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match s.policies.get(&id) {
        Ok(tpl) => Json(tpl).into_response(),
        Err(StoreError::NotFound) => {
            ApiError::NotFound.to_response("unknown policy").into_response()
        }
        Err(e) => {
            tracing::error!(err = %e, "policy lookup failed");
            ApiError::Internal.to_response("policy lookup failed").into_response()
        }
    }
}

/// `POST /api/v1/policies`
pub async fn create_policy(
    State(s): State<Arc<AppState>>,
    ctx: Option<Extension<AuthContext>>,
    Json(body): Json<PolicyBody>,
) -> impl IntoResponse {
    let tpl = match template_from_body(uuid::Uuid::new_v4().to_string(), body) {
        Ok(tpl) => tpl,
        Err(e) => return e.to_response("level must be observe|diagnose|remediate|admin").into_response(),
    };
    match s.policies.create(&tpl) {
        Ok(()) => {
            s.audit.emit(
                "policy.created",
                None,
                &actor(&ctx),
                format!("policy {} created at level {}", tpl.name, tpl.level.as_str()),
            );
            Json(tpl).into_response()
        }
        Err(StoreError::Conflict(_)) => {
            ApiError::Conflict.to_response("policy name already exists").into_response()
        }
        Err(e) => {
            tracing::error!(err = %e, "policy creation failed");
            ApiError::Internal.to_response("policy creation failed").into_response()
        }
    }
}

/// `PUT /api/v1/policies/{id}`
pub async fn update_policy(
    State(s): State<Arc<AppState>>,
    ctx: Option<Extension<AuthContext>>,
    Path(id): Path<String>,
    Json(body): Json<PolicyBody>,
) -> impl IntoResponse {
    let before = s.policies.get(&id).ok();
    let tpl = match template_from_body(id, body) {
        Ok(tpl) => tpl,
        Err(e) => return e.to_response("level must be observe|diagnose|remediate|admin").into_response(),
    };
    match s.policies.update(&tpl) {
        Ok(()) => {
            let mut event =
                AuditEvent::new("policy.updated", actor(&ctx), format!("policy {} updated", tpl.name));
            event.before = before.and_then(|b| serde_json::to_value(b).ok());
            event.after = serde_json::to_value(&tpl).ok();
            s.audit.record(event);
            Json(tpl).into_response()
        }
        Err(StoreError::NotFound) => {
            ApiError::NotFound.to_response("unknown policy").into_response()
        }
        Err(e) => {
            tracing::error!(err = %e, "policy update failed");
            ApiError::Internal.to_response("policy update failed").into_response()
        }
    }
}

/// `DELETE /api/v1/policies/{id}`
pub async fn delete_policy(
    State(s): State<Arc<AppState>>,
    ctx: Option<Extension<AuthContext>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match s.policies.delete(&id) {
        Ok(()) => {
            s.audit.emit("policy.deleted", None, &actor(&ctx), format!("policy {id} deleted"));
            StatusCode::NO_CONTENT.into_response()
        }
        Err(StoreError::NotFound) => {
            ApiError::NotFound.to_response("unknown policy").into_response()
        }
        Err(e) => {
            tracing::error!(err = %e, "policy delete failed");
            ApiError::Internal.to_response("policy delete failed").into_response()
        }
    }
}

/// `POST /api/v1/policies/{id}/push/{probe_id}` — assign a template to a
/// probe and push it down the live session.
pub async fn push_policy(
    State(s): State<Arc<AppState>>,
    ctx: Option<Extension<AuthContext>>,
    Path((id, probe_id)): Path<(String, String)>,
) -> impl IntoResponse {
    let tpl = match s.policies.get(&id) {
        Ok(tpl) => tpl,
        Err(StoreError::NotFound) => {
            return ApiError::NotFound.to_response("unknown policy").into_response();
        }
        Err(e) => {
            tracing::error!(err = %e, "policy lookup failed");
            return ApiError::Internal.to_response("policy lookup failed").into_response();
        }
    };

    if let Err(e) = s.fleet.set_policy(&probe_id, tpl.level, Some(tpl.id.clone())).await {
        return match e {
            StoreError::NotFound => ApiError::NotFound.to_response("unknown probe").into_response(),
            other => {
                tracing::error!(err = %other, "policy assignment failed");
                ApiError::Internal.to_response("policy assignment failed").into_response()
            }
        };
    }

    let update = PolicyUpdate {
        level: tpl.level.as_str().to_owned(),
        allowed_commands: tpl.allowed_commands.clone(),
        blocked_commands: tpl.blocked_commands.clone(),
        allowed_paths: tpl.allowed_paths.clone(),
    };
    let delivered = s.hub.send_to(&probe_id, MessageType::PolicyUpdate, &update).await.is_ok();

    s.audit.record(
        AuditEvent::new(
            "policy.pushed",
            actor(&ctx),
            format!("policy {} pushed to {probe_id}", tpl.name),
        )
        .probe(&probe_id)
        .with_detail(serde_json::json!({ "policy_id": tpl.id, "delivered": delivered })),
    );
    s.bus.publish(Event::for_probe("policy.pushed", &probe_id));
    Json(serde_json::json!({ "policy_id": tpl.id, "probe_id": probe_id, "delivered": delivered }))
        .into_response()
}
