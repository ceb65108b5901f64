// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use chrono::{TimeZone, Utc};

use super::*;

fn store() -> AuditStore {
    AuditStore::open_ephemeral(100).unwrap()
}

fn backdated(id: &str, secs: i64) -> AuditEvent {
    let mut ev = AuditEvent::new("test.event", "tester", format!("event {id}"));
    ev.id = id.to_owned();
    ev.timestamp = Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap();
    ev
}

#[test]
fn record_enriches_blank_id() {
    let store = store();
    let mut ev = AuditEvent::new("test.event", "tester", "no id");
    ev.id = String::new();
    store.record(ev);

    let got = store.query(&AuditFilter::default());
    assert_eq!(got.len(), 1);
    assert!(!got[0].id.is_empty());
}

#[test]
fn duplicate_ids_are_silently_ignored() {
    let store = store();
    store.record(backdated("dup-1", 0));
    store.record(backdated("dup-1", 10));

    assert_eq!(store.count().unwrap(), 1);
    assert_eq!(store.query(&AuditFilter::default()).len(), 1);
}

#[test]
fn query_is_newest_first_and_respects_limit() {
    let store = store();
    for i in 0..5 {
        store.record(backdated(&format!("evt-{}", i + 1), i));
    }

    let got = store.query(&AuditFilter { limit: 2, ..Default::default() });
    assert_eq!(got.len(), 2);
    assert_eq!(got[0].id, "evt-5");
    assert_eq!(got[1].id, "evt-4");
}

#[test]
fn cursor_pagination_walks_pages_in_order() {
    // Five events recorded in increasing timestamp order.
    let store = store();
    for i in 0..5 {
        store.record(backdated(&format!("evt-{}", i + 1), i));
    }

    let page1 = store
        .query_persisted(&AuditFilter { limit: 2, ..Default::default() })
        .unwrap();
    assert_eq!(page1.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), ["evt-5", "evt-4"]);

    let page2 = store
        .query_persisted(&AuditFilter {
            cursor: Some("evt-4".to_owned()),
            limit: 2,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(page2.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), ["evt-3", "evt-2"]);
}

#[test]
fn missing_cursor_row_yields_empty_page() {
    let store = store();
    store.record(backdated("evt-1", 0));

    let page = store
        .query_persisted(&AuditFilter { cursor: Some("gone".to_owned()), ..Default::default() })
        .unwrap();
    assert!(page.is_empty());
}

#[test]
fn filters_apply_to_both_tiers() {
    let store = store();
    let mut a = backdated("a", 0);
    a.probe_id = Some("p1".to_owned());
    let mut b = backdated("b", 1);
    b.probe_id = Some("p2".to_owned());
    b.event_type = "other.event".to_owned();
    store.record(a);
    store.record(b);

    let filter = AuditFilter { probe_id: Some("p1".to_owned()), ..Default::default() };
    assert_eq!(store.query(&filter).len(), 1);
    assert_eq!(store.query_persisted(&filter).unwrap().len(), 1);

    let filter = AuditFilter { event_type: Some("other.event".to_owned()), ..Default::default() };
    assert_eq!(store.query_persisted(&filter).unwrap()[0].id, "b");
}

#[test]
fn purge_removes_old_rows_and_rebuilds_ring() {
    let store = store();
    let mut old = AuditEvent::new("test.event", "tester", "old");
    old.id = "old-1".to_owned();
    old.timestamp = Utc::now() - chrono::Duration::hours(48);
    store.record(old);
    store.record(AuditEvent::new("test.event", "tester", "fresh"));

    let deleted = store.purge(Duration::from_secs(24 * 3600)).unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(store.count().unwrap(), 1);

    // Ring was rebuilt: no event older than the cutoff survives anywhere.
    let remaining = store.query(&AuditFilter::default());
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].summary, "fresh");
}

#[test]
fn ring_keeps_newest_when_over_capacity() {
    let store = AuditStore::open_ephemeral(3).unwrap();
    for i in 0..5 {
        store.record(backdated(&format!("evt-{}", i + 1), i));
    }

    let ring = store.query(&AuditFilter::default());
    assert_eq!(ring.len(), 3);
    assert_eq!(ring[0].id, "evt-5");
    // Durable tier still holds everything.
    assert_eq!(store.count().unwrap(), 5);
}

#[test]
fn csv_export_projects_and_escapes() {
    let store = store();
    let mut ev = backdated("csv-1", 0);
    ev.summary = "said \"hello\", twice".to_owned();
    ev.probe_id = Some("p1".to_owned());
    store.record(ev);

    let mut out = Vec::new();
    store.stream_csv(&mut out, &AuditFilter::default()).unwrap();
    let text = String::from_utf8(out).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next().unwrap(), "id,timestamp,type,probe_id,actor,summary");
    let row = lines.next().unwrap();
    assert!(row.starts_with("csv-1,"));
    assert!(row.ends_with("\"said \"\"hello\"\", twice\""));
}

#[test]
fn jsonl_export_emits_one_object_per_line() {
    let store = store();
    store.record(backdated("j-1", 0));
    store.record(backdated("j-2", 1));

    let mut out = Vec::new();
    store.stream_jsonl(&mut out, &AuditFilter::default()).unwrap();
    let text = String::from_utf8(out).unwrap();
    let lines: Vec<_> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["id"], "j-2");
}
