// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use super::*;

fn result(request_id: &str, exit_code: i32) -> CommandResult {
    CommandResult {
        request_id: request_id.to_owned(),
        exit_code,
        stdout: "ok".to_owned(),
        stderr: String::new(),
        duration_ms: 5,
    }
}

fn tracker() -> CommandTracker {
    CommandTracker::new(Duration::from_secs(120))
}

#[tokio::test]
async fn complete_delivers_to_the_waiter() {
    let tracker = tracker();
    let rx = tracker.track("req-a", "p1", "ls", CapabilityLevel::Observe).unwrap();
    assert_eq!(tracker.in_flight(), 1);

    assert!(tracker.complete("req-a", result("req-a", 0)));
    let got = rx.await.unwrap();
    assert_eq!(got.exit_code, 0);
    assert_eq!(tracker.in_flight(), 0);
}

#[tokio::test]
async fn complete_is_idempotent() {
    let tracker = tracker();
    let _rx = tracker.track("req-a", "p1", "ls", CapabilityLevel::Observe).unwrap();
    assert!(tracker.complete("req-a", result("req-a", 0)));
    // Second and third completes are no-ops, never a panic.
    assert!(!tracker.complete("req-a", result("req-a", 1)));
    assert!(!tracker.complete("req-a", result("req-a", 2)));
}

#[tokio::test]
async fn complete_for_unknown_id_is_a_noop() {
    let tracker = tracker();
    assert!(!tracker.complete("req-ghost", result("req-ghost", 0)));
}

#[tokio::test]
async fn cancel_closes_the_channel() {
    let tracker = tracker();
    let rx = tracker.track("req-a", "p1", "ls", CapabilityLevel::Observe).unwrap();
    tracker.cancel("req-a");
    assert!(rx.await.is_err());
    assert_eq!(tracker.in_flight(), 0);
}

#[tokio::test]
async fn duplicate_track_is_rejected() {
    let tracker = tracker();
    let _rx = tracker.track("req-a", "p1", "ls", CapabilityLevel::Observe).unwrap();
    assert!(matches!(
        tracker.track("req-a", "p1", "ls", CapabilityLevel::Observe),
        Err(TrackerError::Duplicate(_))
    ));
}

#[tokio::test]
async fn sweep_expires_past_deadline_entries() {
    let tracker = CommandTracker::new(Duration::ZERO);
    let rx = tracker.track("req-a", "p1", "ls", CapabilityLevel::Observe).unwrap();

    let expired = tracker.sweep_expired();
    assert_eq!(expired, vec!["req-a".to_owned()]);
    assert!(rx.await.is_err());
}

#[tokio::test]
async fn list_pending_reports_entries() {
    let tracker = tracker();
    let _a = tracker.track("req-a", "p1", "ls", CapabilityLevel::Observe).unwrap();
    let _b = tracker.track("req-b", "p2", "ps", CapabilityLevel::Diagnose).unwrap();

    let pending = tracker.list_pending();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].request_id, "req-a");
    assert_eq!(pending[1].probe_id, "p2");
}

#[test]
fn request_ids_are_process_unique() {
    let a = next_request_id();
    let b = next_request_id();
    assert_ne!(a, b);
    assert!(a.starts_with("req-"));
}
