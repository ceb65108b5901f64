// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashSet;

use super::*;

#[test]
fn permission_strings_round_trip() {
    for perm in [
        Permission::FleetRead,
        Permission::FleetWrite,
        Permission::CommandExec,
        Permission::ApprovalRead,
        Permission::ApprovalWrite,
        Permission::AuditRead,
        Permission::WebhookManage,
        Permission::Admin,
    ] {
        assert_eq!(Permission::parse(perm.as_str()), Some(perm));
    }
    assert_eq!(Permission::parse("fleet:admin"), None);
}

#[test]
fn admin_implies_everything() {
    let ctx = AuthContext {
        actor: "root".to_owned(),
        credential: Credential::Session { user_id: "u1".to_owned() },
        permissions: Role::Admin.permissions(),
        extra_grants: vec![],
    };
    assert!(ctx.allows(Permission::FleetWrite));
    assert!(ctx.allows(Permission::CommandExec));
    assert!(ctx.allows(Permission::Admin));
}

#[test]
fn operator_covers_day_to_day_but_not_admin() {
    let perms = Role::Operator.permissions();
    let ctx = AuthContext {
        actor: "op".to_owned(),
        credential: Credential::Session { user_id: "u2".to_owned() },
        permissions: perms,
        extra_grants: vec![],
    };
    assert!(ctx.allows(Permission::FleetRead));
    assert!(ctx.allows(Permission::FleetWrite));
    assert!(ctx.allows(Permission::CommandExec));
    assert!(ctx.allows(Permission::ApprovalWrite));
    assert!(ctx.allows(Permission::WebhookManage));
    assert!(!ctx.allows(Permission::Admin));
}

#[test]
fn viewer_is_read_only() {
    let ctx = AuthContext {
        actor: "view".to_owned(),
        credential: Credential::ApiKey { key_id: "k1".to_owned() },
        permissions: Role::Viewer.permissions(),
        extra_grants: vec![],
    };
    assert!(ctx.allows(Permission::FleetRead));
    assert!(ctx.allows(Permission::ApprovalRead));
    assert!(ctx.allows(Permission::AuditRead));
    assert!(!ctx.allows(Permission::FleetWrite));
    assert!(!ctx.allows(Permission::CommandExec));
}

#[test]
fn permission_gate_requires_exact_grant_without_admin() {
    let ctx = AuthContext {
        actor: "svc".to_owned(),
        credential: Credential::ApiKey { key_id: "k2".to_owned() },
        permissions: HashSet::from([Permission::FleetRead]),
        extra_grants: vec![],
    };
    assert!(ctx.allows(Permission::FleetRead));
    assert!(!ctx.allows(Permission::CommandExec));
}
