// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use chrono::Utc;

use super::*;

fn store() -> ApiKeyStore {
    ApiKeyStore::open_ephemeral().unwrap()
}

#[test]
fn create_then_validate_round_trips() {
    let store = store();
    let (info, plaintext) = store
        .create("ci-bot", &["fleet:read".to_owned(), "command:exec".to_owned()], None)
        .unwrap();
    assert!(plaintext.starts_with("lg_"));
    assert_eq!(info.prefix, plaintext.chars().take(12).collect::<String>());

    let validated = store.validate(&plaintext).unwrap();
    assert_eq!(validated.id, info.id);
    assert!(validated.permissions.contains(&Permission::FleetRead));
    assert!(validated.permissions.contains(&Permission::CommandExec));
    assert!(validated.extra_grants.is_empty());
}

#[test]
fn scope_grants_survive_as_extra_grants() {
    let store = store();
    let (_, plaintext) = store
        .create("federated", &["fleet:read".to_owned(), "tenant:acme".to_owned()], None)
        .unwrap();
    let validated = store.validate(&plaintext).unwrap();
    assert_eq!(validated.extra_grants, vec!["tenant:acme".to_owned()]);
}

#[test]
fn wrong_or_foreign_keys_are_unknown() {
    let store = store();
    let (_, plaintext) = store.create("a", &[], None).unwrap();
    assert_eq!(store.validate("not-a-key"), Err(KeyRejection::Unknown));
    // Same prefix shape, different tail.
    let mut forged = plaintext.clone();
    forged.truncate(plaintext.len() - 4);
    forged.push_str("XXXX");
    assert_eq!(store.validate(&forged), Err(KeyRejection::Unknown));
}

#[test]
fn disabled_keys_are_rejected() {
    let store = store();
    let (info, plaintext) = store.create("a", &[], None).unwrap();
    store.set_enabled(&info.id, false).unwrap();
    assert_eq!(store.validate(&plaintext), Err(KeyRejection::Disabled));
    store.set_enabled(&info.id, true).unwrap();
    assert!(store.validate(&plaintext).is_ok());
}

#[test]
fn expired_keys_are_rejected() {
    let store = store();
    let past = Utc::now() - chrono::Duration::hours(1);
    let (_, plaintext) = store.create("a", &[], Some(past)).unwrap();
    assert_eq!(store.validate(&plaintext), Err(KeyRejection::Expired));
}

#[test]
fn duplicate_key_name_is_a_conflict() {
    let store = store();
    store.create("a", &[], None).unwrap();
    assert!(matches!(store.create("a", &[], None), Err(StoreError::Conflict(_))));
}

#[test]
fn delete_removes_the_key() {
    let store = store();
    let (info, plaintext) = store.create("a", &[], None).unwrap();
    store.delete(&info.id).unwrap();
    assert_eq!(store.validate(&plaintext), Err(KeyRejection::Unknown));
    assert!(store.list().unwrap().is_empty());
}

#[test]
fn touch_last_used_is_visible_in_listing() {
    let store = store();
    let (info, _) = store.create("a", &[], None).unwrap();
    assert!(store.list().unwrap()[0].last_used_at.is_none());
    store.touch_last_used(&info.id);
    assert!(store.list().unwrap()[0].last_used_at.is_some());
}

#[test]
fn rate_limiter_slides_its_window() {
    let limiter = RateLimiter::new(3, Duration::from_millis(20));
    assert!(limiter.check("k"));
    assert!(limiter.check("k"));
    assert!(limiter.check("k"));
    assert!(!limiter.check("k"));
    // Other keys are unaffected.
    assert!(limiter.check("other"));

    std::thread::sleep(Duration::from_millis(25));
    assert!(limiter.check("k"));
}

#[test]
fn zero_limit_disables_rate_limiting() {
    let limiter = RateLimiter::new(0, Duration::from_secs(60));
    for _ in 0..1000 {
        assert!(limiter.check("k"));
    }
}
