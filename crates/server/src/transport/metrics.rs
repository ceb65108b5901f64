// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Prometheus text rendering for `/api/v1/metrics`.

use std::fmt::Write;
use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use crate::fleet::ProbeStatus;
use crate::state::AppState;

/// `GET /api/v1/metrics`
pub async fn metrics(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    let counts = s.fleet.count().await;
    let connected = s.hub.connected_count().await;
    let in_flight = s.tracker.in_flight();
    let pending_approvals = s.approvals.pending_count();
    let audit_rows = s.audit.count().unwrap_or(0);
    let subscribers = s.bus.subscriber_count();

    let mut out = String::new();
    let _ = writeln!(out, "# HELP legator_probes Probes by status.");
    let _ = writeln!(out, "# TYPE legator_probes gauge");
    for status in
        [ProbeStatus::Online, ProbeStatus::Degraded, ProbeStatus::Offline, ProbeStatus::Pending]
    {
        let n = counts.get(&status).copied().unwrap_or(0);
        let _ = writeln!(out, "legator_probes{{status=\"{}\"}} {n}", status.as_str());
    }
    let _ = writeln!(out, "# HELP legator_sessions_connected Active probe sessions.");
    let _ = writeln!(out, "# TYPE legator_sessions_connected gauge");
    let _ = writeln!(out, "legator_sessions_connected {connected}");
    let _ = writeln!(out, "# HELP legator_commands_in_flight Tracked pending commands.");
    let _ = writeln!(out, "# TYPE legator_commands_in_flight gauge");
    let _ = writeln!(out, "legator_commands_in_flight {in_flight}");
    let _ = writeln!(out, "# HELP legator_approvals_pending Approvals awaiting a decision.");
    let _ = writeln!(out, "# TYPE legator_approvals_pending gauge");
    let _ = writeln!(out, "legator_approvals_pending {pending_approvals}");
    let _ = writeln!(out, "# HELP legator_audit_events_total Durable audit rows.");
    let _ = writeln!(out, "# TYPE legator_audit_events_total counter");
    let _ = writeln!(out, "legator_audit_events_total {audit_rows}");
    let _ = writeln!(out, "# HELP legator_event_subscribers Live event bus subscribers.");
    let _ = writeln!(out, "# TYPE legator_event_subscribers gauge");
    let _ = writeln!(out, "legator_event_subscribers {subscribers}");

    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], out)
}
