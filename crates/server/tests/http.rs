// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the control-plane HTTP API.
//!
//! Uses `axum_test::TestServer` — no real TCP needed.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use axum_test::TestServer;

use legator::audit::{AuditEvent, AuditFilter, AuditStore};
use legator::auth::apikeys::ApiKeyStore;
use legator::auth::sessions::SessionStore;
use legator::auth::users::UserStore;
use legator::auth::Role;
use legator::config::ServerConfig;
use legator::fleet::FleetRegistry;
use legator::policy::PolicyStore;
use legator::state::AppState;
use legator::transport::build_router;
use legator::webhook::WebhookStore;

use chrono::{TimeZone, Utc};
use clap::Parser;

fn test_config() -> ServerConfig {
    ServerConfig::parse_from(["legatord"])
}

/// State with no credential channel configured: permission gates pass through.
fn open_state() -> Arc<AppState> {
    let config = test_config();
    AppState::assemble(
        config.clone(),
        Arc::new(
            FleetRegistry::open_ephemeral(config.active_window(), config.degraded_window())
                .unwrap(),
        ),
        Arc::new(AuditStore::open_ephemeral(config.audit_ring_capacity).unwrap()),
        Arc::new(PolicyStore::open_ephemeral().unwrap()),
        None,
        None,
        None,
        Arc::new(WebhookStore::open_ephemeral().unwrap()),
        None,
        None,
    )
}

/// State with api keys, users, and sessions configured.
fn secured_state() -> Arc<AppState> {
    let config = test_config();
    AppState::assemble(
        config.clone(),
        Arc::new(
            FleetRegistry::open_ephemeral(config.active_window(), config.degraded_window())
                .unwrap(),
        ),
        Arc::new(AuditStore::open_ephemeral(config.audit_ring_capacity).unwrap()),
        Arc::new(PolicyStore::open_ephemeral().unwrap()),
        Some(Arc::new(ApiKeyStore::open_ephemeral().unwrap())),
        Some(Arc::new(UserStore::open_ephemeral().unwrap())),
        Some(Arc::new(SessionStore::open_ephemeral().unwrap())),
        Arc::new(WebhookStore::open_ephemeral().unwrap()),
        None,
        None,
    )
}

fn test_server(state: Arc<AppState>) -> TestServer {
    TestServer::new(build_router(state)).expect("failed to create test server")
}

#[tokio::test]
async fn healthz_and_version_are_public() -> anyhow::Result<()> {
    let server = test_server(open_state());

    let resp = server.get("/healthz").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "ok");

    let resp = server.get("/version").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["name"], "legator");
    Ok(())
}

#[tokio::test]
async fn register_consumes_a_one_shot_token() -> anyhow::Result<()> {
    let state = open_state();
    let server = test_server(Arc::clone(&state));

    let resp = server.post("/api/v1/tokens").json(&serde_json::json!({})).await;
    resp.assert_status_ok();
    let token = resp.json::<serde_json::Value>()["value"].as_str().unwrap().to_owned();

    let resp = server
        .post("/api/v1/register")
        .json(&serde_json::json!({
            "token": token,
            "probe_id": "edge-1",
            "hostname": "edge-1.local",
            "os": "linux",
            "arch": "x86_64",
        }))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["probe_id"], "edge-1");
    assert!(body["api_key"].as_str().unwrap().starts_with("pk_"));

    // One-shot: reuse fails.
    let resp = server
        .post("/api/v1/register")
        .json(&serde_json::json!({ "token": token, "probe_id": "edge-2" }))
        .await;
    resp.assert_status_unauthorized();

    // The probe is visible in the fleet, pending until it heartbeats.
    let resp = server.get("/api/v1/probes/edge-1").await;
    resp.assert_status_ok();
    assert_eq!(resp.json::<serde_json::Value>()["status"], "pending");
    Ok(())
}

#[tokio::test]
async fn oversized_write_bodies_are_rejected() -> anyhow::Result<()> {
    // A 2 MiB body is rejected; a body of exactly 1 MiB passes the middleware.
    let server = test_server(open_state());

    let resp = server
        .post("/api/v1/fleet/cleanup")
        .content_type("application/json")
        .bytes(vec![b'x'; 2 * 1024 * 1024].into())
        .await;
    resp.assert_status(axum::http::StatusCode::PAYLOAD_TOO_LARGE);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["code"], "request_too_large");

    let resp = server
        .post("/api/v1/fleet/cleanup")
        .content_type("application/json")
        .bytes(vec![b'x'; 1024 * 1024].into())
        .await;
    assert_ne!(resp.status_code(), axum::http::StatusCode::PAYLOAD_TOO_LARGE);
    Ok(())
}

#[tokio::test]
async fn missing_credentials_yield_401_and_an_audit_event() -> anyhow::Result<()> {
    let state = secured_state();
    let server = test_server(Arc::clone(&state));

    let resp = server.get("/api/v1/probes").await;
    resp.assert_status_unauthorized();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["code"], "unauthorized");

    let denied = state.audit.query(&AuditFilter {
        event_type: Some("auth.authorization_denied".to_owned()),
        ..Default::default()
    });
    assert_eq!(denied.len(), 1);
    let detail = denied[0].detail.as_ref().unwrap();
    assert_eq!(detail["reason"], "authentication_required");
    Ok(())
}

#[tokio::test]
async fn insufficient_permission_yields_403_with_audit_detail() -> anyhow::Result<()> {
    // A key granting only fleet:read may not exec commands.
    let state = secured_state();
    let (_, plaintext) = state
        .api_keys
        .as_ref()
        .unwrap()
        .create("read-only", &["fleet:read".to_owned()], None)
        .unwrap();
    let server = test_server(Arc::clone(&state));

    let resp = server
        .post("/api/v1/probes/p1/command")
        .authorization_bearer(&plaintext)
        .json(&serde_json::json!({ "command": "ls" }))
        .await;
    resp.assert_status_forbidden();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["code"], "forbidden");

    let denied = state.audit.query(&AuditFilter {
        event_type: Some("auth.authorization_denied".to_owned()),
        ..Default::default()
    });
    assert_eq!(denied.len(), 1);
    let detail = denied[0].detail.as_ref().unwrap();
    assert_eq!(detail["path"], "/api/v1/probes/p1/command");
    assert_eq!(detail["required_permission"], "command:exec");
    assert_eq!(detail["reason"], "insufficient_permissions");

    // The same key may read the fleet.
    let resp = server.get("/api/v1/probes").authorization_bearer(&plaintext).await;
    resp.assert_status_ok();
    Ok(())
}

#[tokio::test]
async fn invalid_api_key_is_rejected_up_front() -> anyhow::Result<()> {
    let state = secured_state();
    let server = test_server(Arc::clone(&state));

    let resp = server
        .get("/api/v1/probes")
        .authorization_bearer("lg_definitelyNotARealKey1234567890abcdefgh")
        .await;
    resp.assert_status_unauthorized();

    let failed = state.audit.query(&AuditFilter {
        event_type: Some("auth.login_failed".to_owned()),
        ..Default::default()
    });
    assert_eq!(failed.len(), 1);
    Ok(())
}

#[tokio::test]
async fn admin_key_passes_every_gate() -> anyhow::Result<()> {
    let state = secured_state();
    let (_, plaintext) =
        state.api_keys.as_ref().unwrap().create("root", &["admin".to_owned()], None).unwrap();
    let server = test_server(Arc::clone(&state));

    server.get("/api/v1/probes").authorization_bearer(&plaintext).await.assert_status_ok();
    server.get("/api/v1/audit").authorization_bearer(&plaintext).await.assert_status_ok();
    server.get("/api/v1/users").authorization_bearer(&plaintext).await.assert_status_ok();
    server.get("/api/v1/apikeys").authorization_bearer(&plaintext).await.assert_status_ok();
    Ok(())
}

#[tokio::test]
async fn login_sets_a_session_cookie_that_authenticates() -> anyhow::Result<()> {
    let state = secured_state();
    state.users.as_ref().unwrap().create("op", "Operator", "hunter22pass", Role::Operator).unwrap();
    let server = test_server(Arc::clone(&state));

    let resp = server
        .post("/api/v1/auth/login")
        .json(&serde_json::json!({ "username": "op", "password": "hunter22pass" }))
        .await;
    resp.assert_status_ok();
    let set_cookie = resp.header("set-cookie");
    let cookie = set_cookie.to_str()?.split(';').next().unwrap().to_owned();
    assert!(cookie.starts_with("legator_session="));

    let resp = server.get("/api/v1/auth/me").add_header("cookie", &cookie).await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["actor"], "op");
    assert_eq!(body["credential"], "session");

    // Operator role covers fleet reads.
    server.get("/api/v1/probes").add_header("cookie", &cookie).await.assert_status_ok();

    // Bad password fails and is audited.
    let resp = server
        .post("/api/v1/auth/login")
        .json(&serde_json::json!({ "username": "op", "password": "wrong" }))
        .await;
    resp.assert_status_unauthorized();
    let failed = state.audit.query(&AuditFilter {
        event_type: Some("auth.login_failed".to_owned()),
        ..Default::default()
    });
    assert_eq!(failed.len(), 1);
    Ok(())
}

#[tokio::test]
async fn audit_endpoint_paginates_with_a_cursor() -> anyhow::Result<()> {
    let state = open_state();
    for i in 0..5 {
        let mut ev = AuditEvent::new("test.event", "tester", format!("event {i}"));
        ev.id = format!("evt-{}", i + 1);
        ev.timestamp = Utc.timestamp_opt(1_700_000_000 + i, 0).single().unwrap();
        state.audit.record(ev);
    }
    let server = test_server(Arc::clone(&state));

    let resp = server.get("/api/v1/audit?limit=2").await;
    resp.assert_status_ok();
    let page: Vec<serde_json::Value> = resp.json();
    assert_eq!(page[0]["id"], "evt-5");
    assert_eq!(page[1]["id"], "evt-4");

    let resp = server.get("/api/v1/audit?limit=2&cursor=evt-4").await;
    let page: Vec<serde_json::Value> = resp.json();
    assert_eq!(page[0]["id"], "evt-3");
    assert_eq!(page[1]["id"], "evt-2");
    Ok(())
}

#[tokio::test]
async fn audit_export_and_purge_round_trip() -> anyhow::Result<()> {
    let state = open_state();
    state.audit.emit("test.event", Some("p1"), "tester", "hello");
    let server = test_server(Arc::clone(&state));

    let resp = server.get("/api/v1/audit/export").await;
    resp.assert_status_ok();
    assert!(resp.text().contains("\"type\":\"test.event\""));

    let resp = server.get("/api/v1/audit/export.csv").await;
    resp.assert_status_ok();
    assert!(resp.text().starts_with("id,timestamp,type,probe_id,actor,summary"));

    let resp = server.delete("/api/v1/audit/purge?older_than_secs=0").await;
    resp.assert_status_ok();
    // The purge itself is audited afterwards, so the count restarts at one.
    assert_eq!(resp.json::<serde_json::Value>()["deleted"], 1);
    Ok(())
}

#[tokio::test]
async fn metrics_render_prometheus_text() -> anyhow::Result<()> {
    let server = test_server(open_state());
    let resp = server.get("/api/v1/metrics").await;
    resp.assert_status_ok();
    let text = resp.text();
    assert!(text.contains("legator_probes{status=\"online\"}"));
    assert!(text.contains("legator_commands_in_flight 0"));
    Ok(())
}

#[tokio::test]
async fn unknown_probe_paths_return_not_found() -> anyhow::Result<()> {
    let server = test_server(open_state());
    let resp = server.get("/api/v1/probes/ghost").await;
    resp.assert_status_not_found();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["code"], "not_found");

    let resp = server
        .post("/api/v1/probes/ghost/command")
        .json(&serde_json::json!({ "command": "ls" }))
        .await;
    resp.assert_status_not_found();
    Ok(())
}

#[tokio::test]
async fn policies_crud_and_push_assignment() -> anyhow::Result<()> {
    let state = open_state();
    // Register a probe to push at.
    state
        .fleet
        .heartbeat(&legator_protocol::Heartbeat {
            probe_id: "p1".to_owned(),
            uptime: 1,
            load: [0.0, 0.0, 0.0],
            mem_used: 0,
            mem_total: 0,
            disk_used: 0,
            disk_total: 0,
        })
        .await?;
    let server = test_server(Arc::clone(&state));

    let resp = server
        .post("/api/v1/policies")
        .json(&serde_json::json!({
            "name": "diagnostics",
            "level": "diagnose",
            "blocked_commands": ["rm"],
        }))
        .await;
    resp.assert_status_ok();
    let policy_id = resp.json::<serde_json::Value>()["id"].as_str().unwrap().to_owned();

    let resp = server.post(&format!("/api/v1/policies/{policy_id}/push/p1")).await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    // Not connected, so the frame was not delivered, but assignment stuck.
    assert_eq!(body["delivered"], false);
    let probe = state.fleet.get("p1").await.unwrap();
    assert_eq!(probe.policy_level, legator::policy::CapabilityLevel::Diagnose);
    assert_eq!(probe.policy_template.as_deref(), Some(policy_id.as_str()));

    let resp = server.delete(&format!("/api/v1/policies/{policy_id}")).await;
    resp.assert_status(axum::http::StatusCode::NO_CONTENT);
    Ok(())
}

#[tokio::test]
async fn rate_limit_returns_429_after_the_window_fills() -> anyhow::Result<()> {
    let mut config = test_config();
    config.rate_limit_per_min = 3;
    let state = AppState::assemble(
        config.clone(),
        Arc::new(
            FleetRegistry::open_ephemeral(config.active_window(), config.degraded_window())
                .unwrap(),
        ),
        Arc::new(AuditStore::open_ephemeral(config.audit_ring_capacity).unwrap()),
        Arc::new(PolicyStore::open_ephemeral().unwrap()),
        Some(Arc::new(ApiKeyStore::open_ephemeral().unwrap())),
        None,
        None,
        Arc::new(WebhookStore::open_ephemeral().unwrap()),
        None,
        None,
    );
    let (_, plaintext) = state
        .api_keys
        .as_ref()
        .unwrap()
        .create("busy", &["fleet:read".to_owned()], None)
        .unwrap();
    let server = test_server(Arc::clone(&state));

    for _ in 0..3 {
        server.get("/api/v1/probes").authorization_bearer(&plaintext).await.assert_status_ok();
    }
    let resp = server.get("/api/v1/probes").authorization_bearer(&plaintext).await;
    resp.assert_status(axum::http::StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(resp.json::<serde_json::Value>()["code"], "rate_limited");
    Ok(())
}

#[tokio::test]
async fn webhook_targets_crud_round_trip() -> anyhow::Result<()> {
    let state = open_state();
    let server = test_server(Arc::clone(&state));

    let resp = server
        .post("/api/v1/webhooks")
        .json(&serde_json::json!({ "url": "https://hooks.example/legator", "event_prefix": "probe." }))
        .await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["enabled"], true);
    let webhook_id = body["id"].as_str().unwrap().to_owned();

    let created = state.audit.query(&AuditFilter {
        event_type: Some("webhook.created".to_owned()),
        ..Default::default()
    });
    assert_eq!(created.len(), 1);

    let resp = server.get("/api/v1/webhooks").await;
    resp.assert_status_ok();
    assert_eq!(resp.json::<Vec<serde_json::Value>>().len(), 1);

    let resp = server
        .post(&format!("/api/v1/webhooks/{webhook_id}/enable"))
        .json(&serde_json::json!({ "enabled": false }))
        .await;
    resp.assert_status_ok();
    assert!(state.webhooks.list_enabled()?.is_empty());

    let resp = server.delete(&format!("/api/v1/webhooks/{webhook_id}")).await;
    resp.assert_status(axum::http::StatusCode::NO_CONTENT);
    assert!(state.webhooks.list()?.is_empty());

    // A bare hostname is not a deliverable target.
    let resp = server
        .post("/api/v1/webhooks")
        .json(&serde_json::json!({ "url": "hooks.example" }))
        .await;
    resp.assert_status(axum::http::StatusCode::BAD_REQUEST);
    assert_eq!(resp.json::<serde_json::Value>()["code"], "invalid_request");
    Ok(())
}

#[tokio::test]
async fn webhook_routes_require_webhook_manage() -> anyhow::Result<()> {
    let state = secured_state();
    let (_, plaintext) = state
        .api_keys
        .as_ref()
        .unwrap()
        .create("read-only", &["fleet:read".to_owned()], None)
        .unwrap();
    let server = test_server(Arc::clone(&state));

    let resp = server
        .post("/api/v1/webhooks")
        .authorization_bearer(&plaintext)
        .json(&serde_json::json!({ "url": "https://hooks.example/x" }))
        .await;
    resp.assert_status_forbidden();

    let denied = state.audit.query(&AuditFilter {
        event_type: Some("auth.authorization_denied".to_owned()),
        ..Default::default()
    });
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].detail.as_ref().unwrap()["required_permission"], "webhook:manage");

    // An operator key covers webhook management.
    let (_, op_key) = state
        .api_keys
        .as_ref()
        .unwrap()
        .create("op", &["webhook:manage".to_owned()], None)
        .unwrap();
    let resp = server
        .post("/api/v1/webhooks")
        .authorization_bearer(&op_key)
        .json(&serde_json::json!({ "url": "https://hooks.example/x" }))
        .await;
    resp.assert_status_ok();
    Ok(())
}
