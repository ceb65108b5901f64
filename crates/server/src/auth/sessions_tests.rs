// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use rusqlite::params;

use super::*;

fn store() -> SessionStore {
    SessionStore::open_ephemeral().unwrap()
}

#[test]
fn create_validate_logout() {
    let store = store();
    let id = store.create("u1").unwrap();
    assert!(id.starts_with("sess_"));
    assert_eq!(store.validate(&id).as_deref(), Some("u1"));

    store.delete(&id);
    assert!(store.validate(&id).is_none());
}

#[test]
fn unknown_session_is_invalid() {
    let store = store();
    assert!(store.validate("sess_nope").is_none());
}

#[test]
fn expired_session_is_deleted_on_validate() {
    let store = store();
    let id = store.create("u1").unwrap();

    // Backdate the absolute expiry.
    {
        let db = store.db.lock().unwrap();
        db.execute(
            "UPDATE sessions SET expires_us = ?2 WHERE id = ?1",
            params![id, (Utc::now() - Duration::hours(1)).timestamp_micros()],
        )
        .unwrap();
    }

    assert!(store.validate(&id).is_none());
    assert_eq!(store.count(), 0);
}

#[test]
fn idle_session_expires_before_absolute_deadline() {
    let store = store();
    let id = store.create("u1").unwrap();

    {
        let db = store.db.lock().unwrap();
        db.execute(
            "UPDATE sessions SET last_active_us = ?2 WHERE id = ?1",
            params![id, (Utc::now() - Duration::hours(48)).timestamp_micros()],
        )
        .unwrap();
    }

    assert!(store.validate(&id).is_none());
}

#[test]
fn reaper_removes_only_expired_rows() {
    let store = store();
    let fresh = store.create("u1").unwrap();
    let stale = store.create("u2").unwrap();

    {
        let db = store.db.lock().unwrap();
        db.execute(
            "UPDATE sessions SET last_active_us = ?2 WHERE id = ?1",
            params![stale, (Utc::now() - Duration::hours(48)).timestamp_micros()],
        )
        .unwrap();
    }

    assert_eq!(store.reap_expired(), 1);
    assert!(store.validate(&fresh).is_some());
}

#[test]
fn delete_for_user_drops_all_their_sessions() {
    let store = store();
    let a = store.create("u1").unwrap();
    let b = store.create("u1").unwrap();
    let other = store.create("u2").unwrap();

    store.delete_for_user("u1");
    assert!(store.validate(&a).is_none());
    assert!(store.validate(&b).is_none());
    assert!(store.validate(&other).is_some());
}
