// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Federation scope grants.
//!
//! Optional permission strings of shape `tenant:<id>`, `org:<id>`,
//! `scope:<id>` (or the same with a `federation:` prefix) restrict which
//! federation sources a caller may read. A `*` value clears its dimension.
//! Callers with no grant for a dimension are unrestricted in it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Parsed grants, one optional allow-set per dimension. `None` means
/// unrestricted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeGrants {
    tenants: Option<BTreeSet<String>>,
    orgs: Option<BTreeSet<String>>,
    scopes: Option<BTreeSet<String>>,
}

/// A federation read request's scope dimensions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScopeRequest {
    pub tenant: Option<String>,
    pub org: Option<String>,
    pub scope: Option<String>,
}

/// A scope check failure, carrying both sides for the audit detail.
#[derive(Debug, Clone, Serialize)]
pub struct ScopeDenial {
    pub dimension: &'static str,
    pub requested: String,
    pub allowed: Vec<String>,
}

impl ScopeGrants {
    /// Parse grants from raw permission strings. Unrelated strings are
    /// ignored; `federation:`-prefixed forms are aliases. Grant order never
    /// matters: values per dimension are collected as a set, and a `*`
    /// anywhere clears that dimension.
    pub fn from_permissions(grants: &[String]) -> Self {
        let mut tenants = Vec::new();
        let mut orgs = Vec::new();
        let mut scopes = Vec::new();
        for grant in grants {
            let g = grant.strip_prefix("federation:").unwrap_or(grant);
            if let Some(v) = g.strip_prefix("tenant:") {
                tenants.push(v.trim());
            } else if let Some(v) = g.strip_prefix("org:") {
                orgs.push(v.trim());
            } else if let Some(v) = g.strip_prefix("scope:") {
                scopes.push(v.trim());
            }
        }
        Self { tenants: collect_dim(&tenants), orgs: collect_dim(&orgs), scopes: collect_dim(&scopes) }
    }

    /// Whether any dimension is restricted.
    pub fn is_restricted(&self) -> bool {
        self.tenants.is_some() || self.orgs.is_some() || self.scopes.is_some()
    }

    /// Check a request against the grants.
    pub fn allows(&self, req: &ScopeRequest) -> Result<(), ScopeDenial> {
        check_dim("tenant", &self.tenants, req.tenant.as_deref())?;
        check_dim("org", &self.orgs, req.org.as_deref())?;
        check_dim("scope", &self.scopes, req.scope.as_deref())?;
        Ok(())
    }
}

fn collect_dim(values: &[&str]) -> Option<BTreeSet<String>> {
    let values: Vec<&str> = values.iter().copied().filter(|v| !v.is_empty()).collect();
    if values.is_empty() || values.contains(&"*") {
        return None;
    }
    Some(values.into_iter().map(str::to_owned).collect())
}

/// Enforce a scope check for a federation read, auditing denials.
///
/// Collaborator surfaces (cloud connectors, federation readers) call this
/// before serving scoped data; the audit detail carries both the requested
/// and allowed sets so denials can be reconstructed.
pub fn enforce_scope(
    ctx: &crate::auth::AuthContext,
    req: &ScopeRequest,
    audit: &crate::audit::AuditStore,
    path: &str,
) -> Result<(), ScopeDenial> {
    let grants = ScopeGrants::from_permissions(&ctx.extra_grants);
    match grants.allows(req) {
        Ok(()) => Ok(()),
        Err(denial) => {
            audit.record(
                crate::audit::AuditEvent::new(
                    "auth.authorization_denied",
                    &ctx.actor,
                    "federation scope forbidden",
                )
                .with_detail(serde_json::json!({
                    "path": path,
                    "reason": "forbidden_scope",
                    "dimension": denial.dimension,
                    "requested": denial.requested,
                    "allowed": denial.allowed,
                })),
            );
            Err(denial)
        }
    }
}

fn check_dim(
    name: &'static str,
    allowed: &Option<BTreeSet<String>>,
    requested: Option<&str>,
) -> Result<(), ScopeDenial> {
    let (Some(allowed), Some(requested)) = (allowed, requested) else {
        return Ok(());
    };
    if allowed.contains(requested) {
        Ok(())
    } else {
        Err(ScopeDenial {
            dimension: name,
            requested: requested.to_owned(),
            allowed: allowed.iter().cloned().collect(),
        })
    }
}

#[cfg(test)]
#[path = "scope_tests.rs"]
mod tests;
