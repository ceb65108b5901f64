// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]

use super::*;

fn store() -> UserStore {
    UserStore::open_ephemeral().unwrap()
}

#[test]
fn create_and_login() {
    let store = store();
    let user = store.create("op", "Operator One", "hunter22", Role::Operator).unwrap();
    assert_eq!(user.role, Role::Operator);
    assert!(user.last_login.is_none());

    let logged_in = store.verify_login("op", "hunter22").unwrap();
    assert_eq!(logged_in.id, user.id);
    // Last login was stamped.
    assert!(store.get(&user.id).unwrap().last_login.is_some());
}

#[test]
fn wrong_password_and_unknown_user_are_distinct() {
    let store = store();
    store.create("op", "", "hunter22", Role::Viewer).unwrap();
    assert_eq!(store.verify_login("op", "wrong"), Err(LoginRejection::BadPassword));
    assert_eq!(store.verify_login("ghost", "x"), Err(LoginRejection::UnknownUser));
}

#[test]
fn disabled_users_cannot_login() {
    let store = store();
    let user = store.create("op", "", "hunter22", Role::Viewer).unwrap();
    store.set_enabled(&user.id, false).unwrap();
    assert_eq!(store.verify_login("op", "hunter22"), Err(LoginRejection::Disabled));
}

#[test]
fn duplicate_username_is_a_conflict() {
    let store = store();
    store.create("op", "", "a", Role::Viewer).unwrap();
    assert!(matches!(store.create("op", "", "b", Role::Viewer), Err(StoreError::Conflict(_))));
}

#[test]
fn bootstrap_admin_runs_once() {
    let store = store();
    let password = store.bootstrap_admin().unwrap();
    assert!(password.is_some());
    assert!(store.verify_login("admin", &password.unwrap()).is_ok());

    // Users exist now; no second bootstrap.
    assert!(store.bootstrap_admin().unwrap().is_none());
}

#[test]
fn delete_removes_the_user() {
    let store = store();
    let user = store.create("op", "", "a", Role::Viewer).unwrap();
    store.delete(&user.id).unwrap();
    assert!(matches!(store.get(&user.id), Err(StoreError::NotFound)));
    assert!(matches!(store.delete(&user.id), Err(StoreError::NotFound)));
}
