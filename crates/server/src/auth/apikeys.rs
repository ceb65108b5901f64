// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! API key store (`auth.db`) and per-key rate limiting.
//!
//! Keys look like `lg_<40 alnum>`. The first [`PREFIX_LEN`] characters are
//! stored in the clear and indexed so validation shortlists a single row in
//! O(1) before running the bcrypt comparison; plaintext is never persisted.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::auth::Permission;
use crate::storage::{map_constraint, open_db, open_memory_db, StoreError};

/// Plaintext key prefix stored in the clear for lookup.
const PREFIX_LEN: usize = 12;

/// Key metadata exposed over the admin API (no hash, no plaintext).
#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyInfo {
    pub id: String,
    pub name: String,
    pub prefix: String,
    pub permissions: Vec<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// A validated key: identity plus granted permissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedKey {
    pub id: String,
    pub name: String,
    pub permissions: HashSet<Permission>,
    /// Permission strings that are not core permissions (scope grants).
    pub extra_grants: Vec<String>,
}

/// Why validation failed.
#[derive(Debug, PartialEq, Eq)]
pub enum KeyRejection {
    Unknown,
    Disabled,
    Expired,
}

pub struct ApiKeyStore {
    db: Mutex<Connection>,
}

impl ApiKeyStore {
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        Self::init(open_db(dir, "auth.db")?)
    }

    pub fn open_ephemeral() -> Result<Self, StoreError> {
        Self::init(open_memory_db()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS api_keys (
                 id           TEXT PRIMARY KEY,
                 name         TEXT NOT NULL UNIQUE,
                 prefix       TEXT NOT NULL,
                 hash         TEXT NOT NULL,
                 permissions  TEXT NOT NULL DEFAULT '[]',
                 enabled      INTEGER NOT NULL DEFAULT 1,
                 created_us   INTEGER NOT NULL,
                 last_used_us INTEGER,
                 expires_us   INTEGER
             );
             CREATE INDEX IF NOT EXISTS idx_api_keys_prefix ON api_keys (prefix);",
        )?;
        Ok(Self { db: Mutex::new(conn) })
    }

    /// Create a key. Returns the metadata and the plaintext — the only time
    /// the plaintext ever exists outside the caller's hands.
    pub fn create(
        &self,
        name: &str,
        permissions: &[String],
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(ApiKeyInfo, String), StoreError> {
        let plaintext: String = format!(
            "lg_{}",
            rand::rng().sample_iter(&Alphanumeric).take(40).map(char::from).collect::<String>()
        );
        let prefix: String = plaintext.chars().take(PREFIX_LEN).collect();
        let hash = bcrypt::hash(&plaintext, bcrypt::DEFAULT_COST)
            .map_err(|e| StoreError::Conflict(format!("bcrypt failure: {e}")))?;

        let info = ApiKeyInfo {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_owned(),
            prefix: prefix.clone(),
            permissions: permissions.to_vec(),
            enabled: true,
            created_at: Utc::now(),
            last_used_at: None,
            expires_at,
        };

        let db = self.db.lock().map_err(|_| StoreError::NotFound)?;
        db.execute(
            "INSERT INTO api_keys (id, name, prefix, hash, permissions, enabled, created_us, expires_us)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7)",
            params![
                info.id,
                info.name,
                prefix,
                hash,
                serde_json::to_string(permissions).unwrap_or_default(),
                info.created_at.timestamp_micros(),
                expires_at.map(|t| t.timestamp_micros()),
            ],
        )
        .map_err(|e| map_constraint(e, "api key name"))?;
        Ok((info, plaintext))
    }

    /// Validate a presented plaintext key.
    pub fn validate(&self, plaintext: &str) -> Result<ValidatedKey, KeyRejection> {
        if !plaintext.starts_with("lg_") {
            return Err(KeyRejection::Unknown);
        }
        let prefix: String = plaintext.chars().take(PREFIX_LEN).collect();

        let db = self.db.lock().map_err(|_| KeyRejection::Unknown)?;
        let mut stmt = db
            .prepare(
                "SELECT id, name, hash, permissions, enabled, expires_us
                 FROM api_keys WHERE prefix = ?1",
            )
            .map_err(|_| KeyRejection::Unknown)?;
        let candidates = stmt
            .query_map([&prefix], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                ))
            })
            .map_err(|_| KeyRejection::Unknown)?
            .filter_map(|r| r.ok())
            .collect::<Vec<_>>();
        drop(stmt);
        drop(db);

        for (id, name, hash, perms_json, enabled, expires_us) in candidates {
            if !bcrypt::verify(plaintext, &hash).unwrap_or(false) {
                continue;
            }
            if enabled == 0 {
                return Err(KeyRejection::Disabled);
            }
            if let Some(us) = expires_us {
                let expires = DateTime::from_timestamp_micros(us).unwrap_or_else(Utc::now);
                if expires < Utc::now() {
                    return Err(KeyRejection::Expired);
                }
            }

            let raw: Vec<String> = serde_json::from_str(&perms_json).unwrap_or_default();
            let mut permissions = HashSet::new();
            let mut extra_grants = Vec::new();
            for p in raw {
                match Permission::parse(&p) {
                    Some(perm) => {
                        permissions.insert(perm);
                    }
                    None => extra_grants.push(p),
                }
            }
            return Ok(ValidatedKey { id, name, permissions, extra_grants });
        }
        Err(KeyRejection::Unknown)
    }

    /// Record key usage. Called from a spawned task so validation never waits
    /// on this write.
    pub fn touch_last_used(&self, id: &str) {
        let Ok(db) = self.db.lock() else {
            return;
        };
        let _ = db.execute(
            "UPDATE api_keys SET last_used_us = ?2 WHERE id = ?1",
            params![id, Utc::now().timestamp_micros()],
        );
    }

    pub fn list(&self) -> Result<Vec<ApiKeyInfo>, StoreError> {
        let db = self.db.lock().map_err(|_| StoreError::NotFound)?;
        let mut stmt = db.prepare(
            "SELECT id, name, prefix, permissions, enabled, created_us, last_used_us, expires_us
             FROM api_keys ORDER BY created_us DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            let perms: String = row.get(3)?;
            Ok(ApiKeyInfo {
                id: row.get(0)?,
                name: row.get(1)?,
                prefix: row.get(2)?,
                permissions: serde_json::from_str(&perms).unwrap_or_default(),
                enabled: row.get::<_, i64>(4)? != 0,
                created_at: micros(row.get(5)?),
                last_used_at: row.get::<_, Option<i64>>(6)?.map(micros),
                expires_at: row.get::<_, Option<i64>>(7)?.map(micros),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), StoreError> {
        let db = self.db.lock().map_err(|_| StoreError::NotFound)?;
        let n = db.execute(
            "UPDATE api_keys SET enabled = ?2 WHERE id = ?1",
            params![id, i64::from(enabled)],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        let db = self.db.lock().map_err(|_| StoreError::NotFound)?;
        let n = db.execute("DELETE FROM api_keys WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

fn micros(us: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(us).unwrap_or_else(Utc::now)
}

// -- Rate limiting ------------------------------------------------------------

/// Per-key sliding window limiter. The mutex is held only for the counter
/// update, never across IO.
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    counters: Mutex<HashMap<String, (u32, Instant)>>,
}

impl RateLimiter {
    pub fn new(limit_per_window: u32, window: Duration) -> Self {
        Self { limit: limit_per_window, window, counters: Mutex::new(HashMap::new()) }
    }

    /// Count a request against `key_id`. Returns false when over the limit.
    /// A zero limit disables limiting.
    pub fn check(&self, key_id: &str) -> bool {
        if self.limit == 0 {
            return true;
        }
        let Ok(mut counters) = self.counters.lock() else {
            return true;
        };
        let now = Instant::now();
        let entry = counters.entry(key_id.to_owned()).or_insert((0, now));
        if now.duration_since(entry.1) >= self.window {
            *entry = (0, now);
        }
        entry.0 += 1;
        entry.0 <= self.limit
    }
}

#[cfg(test)]
#[path = "apikeys_tests.rs"]
mod tests;
