// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;
use crate::audit::AuditFilter;

fn command(text: &str, timeout: u64) -> CommandRequest {
    CommandRequest {
        request_id: String::new(),
        command: text.to_owned(),
        args: vec![],
        level: "observe".to_owned(),
        timeout,
        stream: false,
    }
}

struct Fixture {
    hub: Arc<Hub>,
    tracker: Arc<CommandTracker>,
    audit: Arc<AuditStore>,
    dispatcher: Arc<Dispatcher>,
}

fn fixture() -> Fixture {
    let (hub, _lifecycle) = Hub::new(None);
    let tracker = Arc::new(CommandTracker::new(Duration::from_secs(120)));
    let audit = Arc::new(AuditStore::open_ephemeral(100).unwrap());
    let bus = Arc::new(EventBus::new());
    let dispatcher =
        Dispatcher::new(Arc::clone(&hub), Arc::clone(&tracker), Arc::clone(&audit), bus);
    Fixture { hub, tracker, audit, dispatcher }
}

#[tokio::test]
async fn dispatch_only_returns_without_waiting() {
    let fx = fixture();
    let (_conn, mut outbound) = fx.hub.connect("p1").await;

    let outcome = fx
        .dispatcher
        .dispatch_with_policy(
            &CancellationToken::new(),
            "p1",
            command("ls", 0),
            CapabilityLevel::Observe,
            DispatchPolicy::DispatchOnly,
            "op",
        )
        .await;

    assert!(outcome.dispatched);
    assert!(outcome.result.is_none());
    assert!(outcome.err.is_none());
    assert!(outcome.request_id.starts_with("req-"));

    // The frame reached the probe queue and was audited.
    let env = outbound.recv().await.unwrap();
    assert_eq!(env.payload["command"], "ls");
    let sent = fx
        .audit
        .query(&AuditFilter { event_type: Some("command.sent".to_owned()), ..Default::default() });
    assert_eq!(sent.len(), 1);
}

#[tokio::test]
async fn dispatch_to_disconnected_probe_fails_without_audit() {
    let fx = fixture();
    let outcome = fx
        .dispatcher
        .dispatch_with_policy(
            &CancellationToken::new(),
            "ghost",
            command("ls", 0),
            CapabilityLevel::Observe,
            DispatchPolicy::DispatchOnly,
            "op",
        )
        .await;

    assert!(!outcome.dispatched);
    assert!(matches!(outcome.err, Some(DispatchError::NotConnected)));
    assert_eq!(fx.audit.count().unwrap(), 0);
}

#[tokio::test]
async fn wait_resolves_when_the_tracker_completes() {
    let fx = fixture();
    let (_conn, mut outbound) = fx.hub.connect("p1").await;

    let tracker = Arc::clone(&fx.tracker);
    let dispatcher = Arc::clone(&fx.dispatcher);
    let task = tokio::spawn(async move {
        dispatcher
            .dispatch_with_policy(
                &CancellationToken::new(),
                "p1",
                command("ls", 2),
                CapabilityLevel::Observe,
                DispatchPolicy::Wait { timeout: Duration::from_secs(5) },
                "op",
            )
            .await
    });

    // Play the probe: read the frame, complete the request.
    let env = outbound.recv().await.unwrap();
    let request_id = env.payload["request_id"].as_str().unwrap().to_owned();
    tracker.complete(
        &request_id,
        CommandResult {
            request_id: request_id.clone(),
            exit_code: 0,
            stdout: "ok".to_owned(),
            stderr: String::new(),
            duration_ms: 3,
        },
    );

    let outcome = task.await.unwrap();
    assert!(outcome.dispatched);
    let result = outcome.result.unwrap();
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout, "ok");
    assert_eq!(fx.tracker.in_flight(), 0);
}

#[tokio::test]
async fn wait_times_out_and_cancels_the_pending_entry() {
    let fx = fixture();
    let (_conn, _outbound) = fx.hub.connect("p1").await;

    let outcome = fx
        .dispatcher
        .dispatch_with_policy(
            &CancellationToken::new(),
            "p1",
            command("sleep 100", 0),
            CapabilityLevel::Observe,
            DispatchPolicy::Wait { timeout: Duration::from_millis(30) },
            "op",
        )
        .await;

    assert!(matches!(outcome.err, Some(DispatchError::Timeout)));
    assert_eq!(fx.tracker.in_flight(), 0);
}

#[tokio::test]
async fn caller_cancellation_is_marked_for_suppression() {
    let fx = fixture();
    let (_conn, _outbound) = fx.hub.connect("p1").await;

    let cancel = CancellationToken::new();
    let child = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        child.cancel();
    });

    let outcome = fx
        .dispatcher
        .dispatch_with_policy(
            &cancel,
            "p1",
            command("sleep 100", 0),
            CapabilityLevel::Observe,
            DispatchPolicy::Wait { timeout: Duration::from_secs(5) },
            "op",
        )
        .await;

    assert!(matches!(outcome.err, Some(DispatchError::Cancelled)));
    assert_eq!(fx.tracker.in_flight(), 0);
}

#[tokio::test]
async fn explicit_request_ids_are_kept() {
    let fx = fixture();
    let (_conn, mut outbound) = fx.hub.connect("p1").await;

    let mut cmd = command("ls", 0);
    cmd.request_id = "req-ws".to_owned();
    let outcome = fx
        .dispatcher
        .dispatch_with_policy(
            &CancellationToken::new(),
            "p1",
            cmd,
            CapabilityLevel::Observe,
            DispatchPolicy::DispatchOnly,
            "op",
        )
        .await;

    assert_eq!(outcome.request_id, "req-ws");
    let env = outbound.recv().await.unwrap();
    assert_eq!(env.payload["request_id"], "req-ws");
}

#[test]
fn wait_timeout_prefers_command_timeout_plus_slack() {
    assert_eq!(
        wait_timeout_for(&command("ls", 2), Duration::from_secs(35)),
        Duration::from_secs(7)
    );
    assert_eq!(
        wait_timeout_for(&command("ls", 0), Duration::from_secs(10)),
        Duration::from_secs(35)
    );
    assert_eq!(
        wait_timeout_for(&command("ls", 0), Duration::from_secs(60)),
        Duration::from_secs(60)
    );
}
