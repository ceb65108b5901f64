// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fleet registry: probe rows, heartbeat-driven health, tags, and one-shot
//! registration tokens.
//!
//! The in-memory map is authoritative at runtime; every mutation writes
//! through to `fleet.db` so the fleet survives restarts.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use legator_protocol::{Heartbeat, Inventory};

use crate::policy::CapabilityLevel;
use crate::storage::{open_db, open_memory_db, StoreError};

// -- Types --------------------------------------------------------------------

/// Probe connectivity status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Online,
    Degraded,
    Offline,
    Pending,
}

impl ProbeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Degraded => "degraded",
            Self::Offline => "offline",
            Self::Pending => "pending",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "degraded" => Some(Self::Degraded),
            "offline" => Some(Self::Offline),
            "pending" => Some(Self::Pending),
            _ => None,
        }
    }
}

/// Health snapshot derived from the latest heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// 0-100; 100 is a healthy idle host.
    pub score: u8,
    pub uptime: u64,
    pub load: [f64; 3],
    pub mem_used: u64,
    pub mem_total: u64,
    pub disk_used: u64,
    pub disk_total: u64,
    pub reported_at: DateTime<Utc>,
}

/// A managed probe. The api key never serialises into API responses.
#[derive(Debug, Clone, Serialize)]
pub struct Probe {
    pub id: String,
    pub hostname: String,
    pub os: String,
    pub arch: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub status: ProbeStatus,
    pub policy_level: CapabilityLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_template: Option<String>,
    pub tags: Vec<String>,
    pub registered: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inventory: Option<Inventory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthReport>,
}

impl Probe {
    /// Effective status from last-seen recency. Monotone: a more recent
    /// `last_seen` can never yield a worse status.
    pub fn classify(&self, now: DateTime<Utc>, active: Duration, degraded: Duration) -> ProbeStatus {
        if self.status == ProbeStatus::Pending {
            return ProbeStatus::Pending;
        }
        let age = (now - self.last_seen).to_std().unwrap_or(Duration::ZERO);
        if age <= active {
            ProbeStatus::Online
        } else if age <= degraded {
            ProbeStatus::Degraded
        } else {
            ProbeStatus::Offline
        }
    }
}

/// Inventory listing filter.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InventoryFilter {
    pub os: Option<String>,
    pub arch: Option<String>,
    pub tag: Option<String>,
}

/// One-shot probe registration token.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationToken {
    pub value: String,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
    pub used: bool,
}

/// Errors from token consumption.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("unknown registration token")]
    Unknown,
    #[error("registration token already used")]
    Used,
    #[error("registration token expired")]
    Expired,
    #[error(transparent)]
    Store(#[from] StoreError),
}

// -- Registry -----------------------------------------------------------------

/// In-memory fleet registry backed by `fleet.db`.
pub struct FleetRegistry {
    probes: RwLock<HashMap<String, Probe>>,
    db: Mutex<Connection>,
    active_window: Duration,
    degraded_window: Duration,
}

impl FleetRegistry {
    pub fn open(dir: &Path, active: Duration, degraded: Duration) -> Result<Self, StoreError> {
        Self::init(open_db(dir, "fleet.db")?, active, degraded)
    }

    pub fn open_ephemeral(active: Duration, degraded: Duration) -> Result<Self, StoreError> {
        Self::init(open_memory_db()?, active, degraded)
    }

    fn init(conn: Connection, active: Duration, degraded: Duration) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS probes (
                 id              TEXT PRIMARY KEY,
                 hostname        TEXT NOT NULL DEFAULT '',
                 os              TEXT NOT NULL DEFAULT '',
                 arch            TEXT NOT NULL DEFAULT '',
                 api_key         TEXT NOT NULL DEFAULT '',
                 status          TEXT NOT NULL DEFAULT 'pending',
                 policy_level    TEXT NOT NULL DEFAULT 'observe',
                 policy_template TEXT,
                 tags            TEXT NOT NULL DEFAULT '[]',
                 registered_us   INTEGER NOT NULL,
                 last_seen_us    INTEGER NOT NULL,
                 inventory       TEXT,
                 health          TEXT
             );
             CREATE TABLE IF NOT EXISTS registration_tokens (
                 value      TEXT PRIMARY KEY,
                 created_us INTEGER NOT NULL,
                 expires_us INTEGER NOT NULL,
                 used       INTEGER NOT NULL DEFAULT 0
             );",
        )?;

        let mut probes = HashMap::new();
        {
            let mut stmt = conn.prepare("SELECT * FROM probes")?;
            let rows = stmt.query_map([], row_to_probe)?;
            for row in rows {
                let probe = row?;
                probes.insert(probe.id.clone(), probe);
            }
        }

        Ok(Self {
            probes: RwLock::new(probes),
            db: Mutex::new(conn),
            active_window: active,
            degraded_window: degraded,
        })
    }

    // -- Probe lifecycle ------------------------------------------------------

    /// Register a probe. The id must be unused; returns the generated api key.
    pub async fn register(
        &self,
        id: &str,
        hostname: &str,
        os: &str,
        arch: &str,
        level: CapabilityLevel,
    ) -> Result<String, StoreError> {
        let mut probes = self.probes.write().await;
        if probes.contains_key(id) {
            return Err(StoreError::Conflict(format!("probe id {id}")));
        }
        let now = Utc::now();
        let probe = Probe {
            id: id.to_owned(),
            hostname: hostname.to_owned(),
            os: os.to_owned(),
            arch: arch.to_owned(),
            api_key: generate_probe_key(),
            status: ProbeStatus::Pending,
            policy_level: level,
            policy_template: None,
            tags: Vec::new(),
            registered: now,
            last_seen: now,
            inventory: None,
            health: None,
        };
        let key = probe.api_key.clone();
        self.persist(&probe)?;
        probes.insert(id.to_owned(), probe);
        Ok(key)
    }

    /// Apply a heartbeat. Unknown probes auto-register a minimal `observe`
    /// row (registration confirmations can be lost after token consumption);
    /// the returned flag tells the caller to audit `probe.registered`.
    pub async fn heartbeat(&self, hb: &Heartbeat) -> Result<bool, StoreError> {
        let mut probes = self.probes.write().await;
        let now = Utc::now();
        let auto_registered = !probes.contains_key(&hb.probe_id);

        let probe = probes.entry(hb.probe_id.clone()).or_insert_with(|| Probe {
            id: hb.probe_id.clone(),
            hostname: String::new(),
            os: String::new(),
            arch: String::new(),
            api_key: generate_probe_key(),
            status: ProbeStatus::Pending,
            policy_level: CapabilityLevel::Observe,
            policy_template: None,
            tags: Vec::new(),
            registered: now,
            last_seen: now,
            inventory: None,
            health: None,
        });

        // lastSeen is monotonic non-decreasing.
        if now > probe.last_seen {
            probe.last_seen = now;
        }
        probe.status = ProbeStatus::Online;
        let cpus = probe.inventory.as_ref().map(|i| i.cpus).unwrap_or(0);
        probe.health = Some(health_report(hb, cpus, now));

        let snapshot = probe.clone();
        drop(probes);
        self.persist(&snapshot)?;
        Ok(auto_registered)
    }

    pub async fn update_inventory(&self, inv: &Inventory) -> Result<(), StoreError> {
        let mut probes = self.probes.write().await;
        let probe = probes.get_mut(&inv.probe_id).ok_or(StoreError::NotFound)?;
        probe.hostname = inv.hostname.clone();
        probe.os = inv.os.clone();
        probe.arch = inv.arch.clone();
        probe.inventory = Some(inv.clone());
        let snapshot = probe.clone();
        drop(probes);
        self.persist(&snapshot)
    }

    /// Replace a probe's tags, normalised: lowercased, trimmed, deduplicated.
    pub async fn set_tags(&self, id: &str, tags: &[String]) -> Result<Vec<String>, StoreError> {
        let mut normalised: Vec<String> = Vec::new();
        for tag in tags {
            let t = tag.trim().to_lowercase();
            if !t.is_empty() && !normalised.contains(&t) {
                normalised.push(t);
            }
        }

        let mut probes = self.probes.write().await;
        let probe = probes.get_mut(id).ok_or(StoreError::NotFound)?;
        probe.tags = normalised.clone();
        let snapshot = probe.clone();
        drop(probes);
        self.persist(&snapshot)?;
        Ok(normalised)
    }

    pub async fn set_api_key(&self, id: &str, key: &str) -> Result<(), StoreError> {
        let mut probes = self.probes.write().await;
        let probe = probes.get_mut(id).ok_or(StoreError::NotFound)?;
        probe.api_key = key.to_owned();
        let snapshot = probe.clone();
        drop(probes);
        self.persist(&snapshot)
    }

    pub async fn set_policy(
        &self,
        id: &str,
        level: CapabilityLevel,
        template: Option<String>,
    ) -> Result<(), StoreError> {
        let mut probes = self.probes.write().await;
        let probe = probes.get_mut(id).ok_or(StoreError::NotFound)?;
        probe.policy_level = level;
        probe.policy_template = template;
        let snapshot = probe.clone();
        drop(probes);
        self.persist(&snapshot)
    }

    /// Mark a probe online now (hub connect hook).
    pub async fn set_online(&self, id: &str) -> Result<(), StoreError> {
        let mut probes = self.probes.write().await;
        let probe = probes.get_mut(id).ok_or(StoreError::NotFound)?;
        let now = Utc::now();
        if now > probe.last_seen {
            probe.last_seen = now;
        }
        probe.status = ProbeStatus::Online;
        let snapshot = probe.clone();
        drop(probes);
        self.persist(&snapshot)
    }

    /// Transition probes unseen for `threshold` to offline. Returns the ids
    /// that crossed on this sweep only, so callers emit one event per crossing.
    pub async fn mark_offline(&self, threshold: Duration) -> Vec<String> {
        let now = Utc::now();
        let mut crossed = Vec::new();
        let mut snapshots = Vec::new();
        {
            let mut probes = self.probes.write().await;
            for probe in probes.values_mut() {
                let age = (now - probe.last_seen).to_std().unwrap_or(Duration::ZERO);
                if age > threshold
                    && probe.status != ProbeStatus::Offline
                    && probe.status != ProbeStatus::Pending
                {
                    probe.status = ProbeStatus::Offline;
                    crossed.push(probe.id.clone());
                    snapshots.push(probe.clone());
                }
            }
        }
        for snapshot in &snapshots {
            if let Err(e) = self.persist(snapshot) {
                tracing::warn!(probe_id = %snapshot.id, err = %e, "failed to persist offline transition");
            }
        }
        crossed
    }

    /// Delete probes that have been unseen longer than `threshold`.
    pub async fn cleanup_offline(&self, threshold: Duration) -> Vec<String> {
        let now = Utc::now();
        let mut removed = Vec::new();
        {
            let mut probes = self.probes.write().await;
            probes.retain(|id, probe| {
                let age = (now - probe.last_seen).to_std().unwrap_or(Duration::ZERO);
                if age > threshold {
                    removed.push(id.clone());
                    false
                } else {
                    true
                }
            });
        }
        for id in &removed {
            if let Err(e) = self.delete_row(id) {
                tracing::warn!(probe_id = %id, err = %e, "failed to delete probe row");
            }
        }
        removed
    }

    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut probes = self.probes.write().await;
        if probes.remove(id).is_none() {
            return Err(StoreError::NotFound);
        }
        drop(probes);
        self.delete_row(id)
    }

    // -- Reads ----------------------------------------------------------------

    /// Fetch one probe with its effective status.
    pub async fn get(&self, id: &str) -> Option<Probe> {
        let probes = self.probes.read().await;
        probes.get(id).map(|p| self.with_effective_status(p))
    }

    /// The stored api key for a probe (session authentication).
    pub async fn api_key(&self, id: &str) -> Option<String> {
        let probes = self.probes.read().await;
        probes.get(id).map(|p| p.api_key.clone())
    }

    pub async fn list(&self) -> Vec<Probe> {
        let probes = self.probes.read().await;
        let mut out: Vec<Probe> = probes.values().map(|p| self.with_effective_status(p)).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub async fn list_by_tag(&self, tag: &str) -> Vec<Probe> {
        let wanted = tag.trim().to_lowercase();
        let probes = self.probes.read().await;
        let mut out: Vec<Probe> = probes
            .values()
            .filter(|p| p.tags.iter().any(|t| *t == wanted))
            .map(|p| self.with_effective_status(p))
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub async fn inventory(&self, filter: &InventoryFilter) -> Vec<Probe> {
        let probes = self.probes.read().await;
        let mut out: Vec<Probe> = probes
            .values()
            .filter(|p| {
                filter.os.as_ref().is_none_or(|os| p.os.eq_ignore_ascii_case(os))
                    && filter.arch.as_ref().is_none_or(|a| p.arch.eq_ignore_ascii_case(a))
                    && filter.tag.as_ref().is_none_or(|t| {
                        let wanted = t.trim().to_lowercase();
                        p.tags.iter().any(|pt| *pt == wanted)
                    })
            })
            .map(|p| self.with_effective_status(p))
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Probe counts keyed by effective status.
    pub async fn count(&self) -> HashMap<ProbeStatus, usize> {
        let now = Utc::now();
        let probes = self.probes.read().await;
        let mut counts = HashMap::new();
        for probe in probes.values() {
            let status = probe.classify(now, self.active_window, self.degraded_window);
            *counts.entry(status).or_insert(0) += 1;
        }
        counts
    }

    pub async fn tag_counts(&self) -> HashMap<String, usize> {
        let probes = self.probes.read().await;
        let mut counts = HashMap::new();
        for probe in probes.values() {
            for tag in &probe.tags {
                *counts.entry(tag.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    fn with_effective_status(&self, probe: &Probe) -> Probe {
        let mut p = probe.clone();
        p.status = probe.classify(Utc::now(), self.active_window, self.degraded_window);
        p
    }

    // -- Registration tokens --------------------------------------------------

    /// Mint a one-shot registration token with the given time-to-live.
    pub fn create_token(&self, ttl: Duration) -> Result<RegistrationToken, StoreError> {
        let now = Utc::now();
        let token = RegistrationToken {
            value: format!("rt_{}", random_alnum(32)),
            created: now,
            expires: now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(24)),
            used: false,
        };
        let db = self.db.lock().map_err(|_| StoreError::NotFound)?;
        db.execute(
            "INSERT INTO registration_tokens (value, created_us, expires_us, used)
             VALUES (?1, ?2, ?3, 0)",
            params![token.value, token.created.timestamp_micros(), token.expires.timestamp_micros()],
        )?;
        Ok(token)
    }

    pub fn list_tokens(&self) -> Result<Vec<RegistrationToken>, StoreError> {
        let db = self.db.lock().map_err(|_| StoreError::NotFound)?;
        let mut stmt = db.prepare(
            "SELECT value, created_us, expires_us, used FROM registration_tokens
             ORDER BY created_us DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RegistrationToken {
                value: row.get(0)?,
                created: micros_to_utc(row.get(1)?),
                expires: micros_to_utc(row.get(2)?),
                used: row.get::<_, i64>(3)? != 0,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Consume a token. One-shot: a used or expired token is invalid.
    pub fn consume_token(&self, value: &str) -> Result<(), TokenError> {
        let db = self.db.lock().map_err(|_| TokenError::Store(StoreError::NotFound))?;
        let row: Option<(i64, i64)> = db
            .query_row(
                "SELECT expires_us, used FROM registration_tokens WHERE value = ?1",
                [value],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(StoreError::Sqlite(other)),
            })?;

        let (expires_us, used) = row.ok_or(TokenError::Unknown)?;
        if used != 0 {
            return Err(TokenError::Used);
        }
        if micros_to_utc(expires_us) < Utc::now() {
            return Err(TokenError::Expired);
        }
        db.execute("UPDATE registration_tokens SET used = 1 WHERE value = ?1", [value])
            .map_err(StoreError::Sqlite)?;
        Ok(())
    }

    // -- Persistence ----------------------------------------------------------

    fn persist(&self, probe: &Probe) -> Result<(), StoreError> {
        let db = self.db.lock().map_err(|_| StoreError::NotFound)?;
        db.execute(
            "INSERT INTO probes
             (id, hostname, os, arch, api_key, status, policy_level, policy_template,
              tags, registered_us, last_seen_us, inventory, health)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(id) DO UPDATE SET
                 hostname = excluded.hostname, os = excluded.os, arch = excluded.arch,
                 api_key = excluded.api_key, status = excluded.status,
                 policy_level = excluded.policy_level, policy_template = excluded.policy_template,
                 tags = excluded.tags, last_seen_us = excluded.last_seen_us,
                 inventory = excluded.inventory, health = excluded.health",
            params![
                probe.id,
                probe.hostname,
                probe.os,
                probe.arch,
                probe.api_key,
                probe.status.as_str(),
                probe.policy_level.as_str(),
                probe.policy_template,
                serde_json::to_string(&probe.tags).unwrap_or_default(),
                probe.registered.timestamp_micros(),
                probe.last_seen.timestamp_micros(),
                probe.inventory.as_ref().and_then(|v| serde_json::to_string(v).ok()),
                probe.health.as_ref().and_then(|v| serde_json::to_string(v).ok()),
            ],
        )?;
        Ok(())
    }

    fn delete_row(&self, id: &str) -> Result<(), StoreError> {
        let db = self.db.lock().map_err(|_| StoreError::NotFound)?;
        db.execute("DELETE FROM probes WHERE id = ?1", [id])?;
        Ok(())
    }
}

// -- Helpers ------------------------------------------------------------------

fn row_to_probe(row: &rusqlite::Row<'_>) -> rusqlite::Result<Probe> {
    let status: String = row.get(5)?;
    let level: String = row.get(6)?;
    let tags: String = row.get(8)?;
    let inventory: Option<String> = row.get(11)?;
    let health: Option<String> = row.get(12)?;
    Ok(Probe {
        id: row.get(0)?,
        hostname: row.get(1)?,
        os: row.get(2)?,
        arch: row.get(3)?,
        api_key: row.get(4)?,
        status: ProbeStatus::parse(&status).unwrap_or(ProbeStatus::Offline),
        policy_level: CapabilityLevel::parse(&level).unwrap_or(CapabilityLevel::Observe),
        policy_template: row.get(7)?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        registered: micros_to_utc(row.get(9)?),
        last_seen: micros_to_utc(row.get(10)?),
        inventory: inventory.and_then(|s| serde_json::from_str(&s).ok()),
        health: health.and_then(|s| serde_json::from_str(&s).ok()),
    })
}

fn micros_to_utc(us: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(us).unwrap_or_else(Utc::now)
}

/// Health score from heartbeat data: load, memory, and disk pressure each
/// deduct up to 40/30/30 points.
fn health_report(hb: &Heartbeat, cpus: u32, now: DateTime<Utc>) -> HealthReport {
    let mut score: i32 = 100;

    let cpus = cpus.max(1) as f64;
    let load_ratio = hb.load[0] / cpus;
    if load_ratio > 1.0 {
        score -= ((load_ratio - 1.0) * 40.0).min(40.0) as i32;
    }
    if hb.mem_total > 0 {
        let mem_ratio = hb.mem_used as f64 / hb.mem_total as f64;
        if mem_ratio > 0.9 {
            score -= 30;
        } else if mem_ratio > 0.75 {
            score -= 15;
        }
    }
    if hb.disk_total > 0 {
        let disk_ratio = hb.disk_used as f64 / hb.disk_total as f64;
        if disk_ratio > 0.9 {
            score -= 30;
        } else if disk_ratio > 0.75 {
            score -= 15;
        }
    }

    HealthReport {
        score: score.clamp(0, 100) as u8,
        uptime: hb.uptime,
        load: hb.load,
        mem_used: hb.mem_used,
        mem_total: hb.mem_total,
        disk_used: hb.disk_used,
        disk_total: hb.disk_total,
        reported_at: now,
    }
}

/// Generate a probe api key.
pub fn generate_probe_key() -> String {
    format!("pk_{}", random_alnum(40))
}

fn random_alnum(len: usize) -> String {
    rand::rng().sample_iter(&Alphanumeric).take(len).map(char::from).collect()
}

#[cfg(test)]
#[path = "fleet_tests.rs"]
mod tests;
