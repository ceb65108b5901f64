// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Approval queue handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Deserialize;

use crate::approval::ApprovalError;
use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::state::AppState;
use crate::transport::http_fleet::actor;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// `pending` (default) or `all`.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct DecideRequest {
    /// `approved` or `denied`.
    pub decision: String,
    #[serde(default)]
    pub decided_by: Option<String>,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/v1/approvals?status=&limit=`
pub async fn list_approvals(
    State(s): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    match query.status.as_deref() {
        None | Some("pending") => Json(s.approvals.pending()).into_response(),
        Some("all") => Json(s.approvals.all(query.limit.unwrap_or(0))).into_response(),
        Some(other) => ApiError::InvalidRequest
            .to_response(format!("unknown status filter: {other}"))
            .into_response(),
    }
}

/// `GET /api/v1/approvals/{id}`
pub async fn get_approval(
    State(s): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match s.approvals.get(&id) {
        Some(request) => Json(request).into_response(),
        None => ApiError::NotFound.to_response("unknown approval").into_response(),
    }
}

/// `POST /api/v1/approvals/{id}/decide`
pub async fn decide_approval(
    State(s): State<Arc<AppState>>,
    ctx: Option<Extension<AuthContext>>,
    Path(id): Path<String>,
    Json(req): Json<DecideRequest>,
) -> impl IntoResponse {
    let approve = match req.decision.as_str() {
        "approved" | "approve" => true,
        "denied" | "deny" => false,
        other => {
            return ApiError::InvalidRequest
                .to_response(format!("decision must be approved or denied, got {other}"))
                .into_response();
        }
    };
    let decided_by = req.decided_by.unwrap_or_else(|| actor(&ctx));

    match s.approvals.decide(&id, approve, &decided_by).await {
        Ok(request) => Json(request).into_response(),
        Err(ApprovalError::NotFound) => {
            ApiError::NotFound.to_response("unknown approval").into_response()
        }
        Err(ApprovalError::AlreadyDecided(state)) => ApiError::Conflict
            .to_response(format!("approval is already {state}"))
            .into_response(),
        Err(ApprovalError::DispatchFailed { request, error }) => {
            // The approval is terminal; dispatch is the part that failed.
            tracing::warn!(approval_id = %request.id, err = %error, "approved dispatch failed");
            ApiError::BadGateway
                .to_response(format!("approved but dispatch failed: {error}"))
                .into_response()
        }
        Err(ApprovalError::WaitTimeout) => {
            ApiError::Timeout.to_response("timed out").into_response()
        }
    }
}
