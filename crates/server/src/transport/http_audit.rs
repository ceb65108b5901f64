// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Audit query, export, and purge handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::audit::{AuditEvent, AuditFilter};
use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::state::AppState;
use crate::transport::http_fleet::actor;

// -- Request types ------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    #[serde(default)]
    pub probe_id: Option<String>,
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// `memory` queries the recent ring; anything else hits the durable tier.
    #[serde(default)]
    pub tier: Option<String>,
}

impl AuditQuery {
    fn into_filter(self) -> AuditFilter {
        AuditFilter {
            probe_id: self.probe_id,
            event_type: self.event_type,
            since: self.since,
            until: self.until,
            cursor: self.cursor,
            limit: self.limit.unwrap_or(100).min(1000),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PurgeQuery {
    /// Events older than this many seconds are deleted.
    pub older_than_secs: u64,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/v1/audit`
pub async fn query_audit(
    State(s): State<Arc<AppState>>,
    Query(query): Query<AuditQuery>,
) -> impl IntoResponse {
    let memory = matches!(query.tier.as_deref(), Some("memory"));
    let filter = query.into_filter();
    if memory {
        return Json(s.audit.query(&filter)).into_response();
    }
    match s.audit.query_persisted(&filter) {
        Ok(events) => Json(events).into_response(),
        Err(e) => {
            tracing::error!(err = %e, "audit query failed");
            ApiError::Internal.to_response("audit query failed").into_response()
        }
    }
}

/// `GET /api/v1/audit/export` — JSON Lines download.
pub async fn export_jsonl(
    State(s): State<Arc<AppState>>,
    Query(query): Query<AuditQuery>,
) -> impl IntoResponse {
    let mut filter = query.into_filter();
    filter.limit = 0;
    let mut buf = Vec::new();
    if let Err(e) = s.audit.stream_jsonl(&mut buf, &filter) {
        tracing::error!(err = %e, "audit export failed");
        return ApiError::Internal.to_response("audit export failed").into_response();
    }
    (
        [
            (header::CONTENT_TYPE, "application/x-ndjson"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"audit.jsonl\""),
        ],
        buf,
    )
        .into_response()
}

/// `GET /api/v1/audit/export.csv`
pub async fn export_csv(
    State(s): State<Arc<AppState>>,
    Query(query): Query<AuditQuery>,
) -> impl IntoResponse {
    let mut filter = query.into_filter();
    filter.limit = 0;
    let mut buf = Vec::new();
    if let Err(e) = s.audit.stream_csv(&mut buf, &filter) {
        tracing::error!(err = %e, "audit export failed");
        return ApiError::Internal.to_response("audit export failed").into_response();
    }
    (
        [
            (header::CONTENT_TYPE, "text/csv"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"audit.csv\""),
        ],
        buf,
    )
        .into_response()
}

/// `DELETE /api/v1/audit/purge?older_than_secs=`
pub async fn purge_audit(
    State(s): State<Arc<AppState>>,
    ctx: Option<Extension<AuthContext>>,
    Query(query): Query<PurgeQuery>,
) -> impl IntoResponse {
    match s.audit.purge(std::time::Duration::from_secs(query.older_than_secs)) {
        Ok(deleted) => {
            s.audit.record(
                AuditEvent::new("audit.purged", actor(&ctx), format!("purged {deleted} events"))
                    .with_detail(serde_json::json!({
                        "deleted": deleted,
                        "older_than_secs": query.older_than_secs,
                    })),
            );
            Json(serde_json::json!({ "deleted": deleted })).into_response()
        }
        Err(e) => {
            tracing::error!(err = %e, "audit purge failed");
            ApiError::Internal.to_response("audit purge failed").into_response()
        }
    }
}
