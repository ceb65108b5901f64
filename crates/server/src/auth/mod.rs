// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authentication and authorization.
//!
//! Two credential channels (API keys for machines, session cookies for web
//! users) materialise the same [`AuthContext`] on the request; handlers gate
//! on permissions only and never care which channel authenticated the caller.

pub mod apikeys;
pub mod middleware;
pub mod scope;
pub mod sessions;
pub mod users;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

// -- Permissions --------------------------------------------------------------

/// Closed permission set. `Admin` implies all others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    FleetRead,
    FleetWrite,
    CommandExec,
    ApprovalRead,
    ApprovalWrite,
    AuditRead,
    WebhookManage,
    Admin,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FleetRead => "fleet:read",
            Self::FleetWrite => "fleet:write",
            Self::CommandExec => "command:exec",
            Self::ApprovalRead => "approval:read",
            Self::ApprovalWrite => "approval:write",
            Self::AuditRead => "audit:read",
            Self::WebhookManage => "webhook:manage",
            Self::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fleet:read" => Some(Self::FleetRead),
            "fleet:write" => Some(Self::FleetWrite),
            "command:exec" => Some(Self::CommandExec),
            "approval:read" => Some(Self::ApprovalRead),
            "approval:write" => Some(Self::ApprovalWrite),
            "audit:read" => Some(Self::AuditRead),
            "webhook:manage" => Some(Self::WebhookManage),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

// -- Roles --------------------------------------------------------------------

/// Web user roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Operator,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Operator => "operator",
            Self::Viewer => "viewer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Self::Admin),
            "operator" => Some(Self::Operator),
            "viewer" => Some(Self::Viewer),
            _ => None,
        }
    }

    /// The permission set this role grants.
    pub fn permissions(&self) -> HashSet<Permission> {
        use Permission::*;
        match self {
            Self::Admin => HashSet::from([Admin]),
            Self::Operator => HashSet::from([
                FleetRead,
                FleetWrite,
                CommandExec,
                ApprovalRead,
                ApprovalWrite,
                AuditRead,
                WebhookManage,
            ]),
            Self::Viewer => HashSet::from([FleetRead, ApprovalRead, AuditRead]),
        }
    }
}

// -- AuthContext --------------------------------------------------------------

/// Which channel authenticated the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    ApiKey { key_id: String },
    Session { user_id: String },
}

/// Materialised per-request identity.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Display name for audit records (key name or username).
    pub actor: String,
    pub credential: Credential,
    pub permissions: HashSet<Permission>,
    /// Raw permission strings that did not parse as [`Permission`]; scope
    /// grants (`tenant:`/`org:`/`scope:`) live here.
    pub extra_grants: Vec<String>,
}

impl AuthContext {
    /// Whether this context may perform an action gated on `perm`.
    pub fn allows(&self, perm: Permission) -> bool {
        self.permissions.contains(&Permission::Admin) || self.permissions.contains(&perm)
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
