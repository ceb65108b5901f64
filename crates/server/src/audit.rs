// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only audit log.
//!
//! Two tiers: an in-memory ring (newest-kept) answers recent queries without
//! touching disk; a durable sqlite table holds full history for exports and
//! pagination. Ring appends are serialised under one lock; the durable write
//! happens outside it so a slow disk never blocks readers.

use std::collections::{HashSet, VecDeque};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::storage::{open_db, open_memory_db, StoreError};

/// Audit schema version this build reads and writes.
const SCHEMA_VERSION: i64 = 1;

/// An immutable audit record. Never updated after `record`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_id: Option<String>,
    pub actor: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<serde_json::Value>,
}

impl AuditEvent {
    pub fn new(
        event_type: impl Into<String>,
        actor: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.into(),
            probe_id: None,
            actor: actor.into(),
            summary: summary.into(),
            detail: None,
            before: None,
            after: None,
        }
    }

    pub fn probe(mut self, probe_id: impl Into<String>) -> Self {
        self.probe_id = Some(probe_id.into());
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Query filter shared by the in-memory and durable paths.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub probe_id: Option<String>,
    pub event_type: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Event id of the last row of the previous page.
    pub cursor: Option<String>,
    /// Zero means no limit.
    pub limit: usize,
}

impl AuditFilter {
    fn matches(&self, ev: &AuditEvent) -> bool {
        if let Some(ref p) = self.probe_id {
            if ev.probe_id.as_deref() != Some(p.as_str()) {
                return false;
            }
        }
        if let Some(ref t) = self.event_type {
            if &ev.event_type != t {
                return false;
            }
        }
        if let Some(since) = self.since {
            if ev.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if ev.timestamp > until {
                return false;
            }
        }
        true
    }
}

struct Ring {
    events: VecDeque<AuditEvent>,
    ids: HashSet<String>,
    capacity: usize,
}

impl Ring {
    fn push(&mut self, ev: AuditEvent) -> bool {
        if self.ids.contains(&ev.id) {
            return false;
        }
        if self.events.len() == self.capacity {
            if let Some(evicted) = self.events.pop_front() {
                self.ids.remove(&evicted.id);
            }
        }
        self.ids.insert(ev.id.clone());
        self.events.push_back(ev);
        true
    }
}

/// Two-tier audit store.
pub struct AuditStore {
    ring: Mutex<Ring>,
    db: Mutex<Connection>,
}

impl AuditStore {
    pub fn open(dir: &Path, ring_capacity: usize) -> Result<Self, StoreError> {
        let conn = open_db(dir, "audit.db")?;
        Self::init(conn, ring_capacity)
    }

    /// In-memory store for tests.
    pub fn open_ephemeral(ring_capacity: usize) -> Result<Self, StoreError> {
        Self::init(open_memory_db()?, ring_capacity)
    }

    fn init(conn: Connection, ring_capacity: usize) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);
             CREATE TABLE IF NOT EXISTS audit_events (
                 id         TEXT PRIMARY KEY,
                 ts_micros  INTEGER NOT NULL,
                 event_type TEXT NOT NULL,
                 probe_id   TEXT,
                 actor      TEXT NOT NULL,
                 summary    TEXT NOT NULL,
                 detail     TEXT,
                 before_state TEXT,
                 after_state  TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_audit_ts ON audit_events (ts_micros DESC, id DESC);
             CREATE INDEX IF NOT EXISTS idx_audit_probe ON audit_events (probe_id);
             CREATE INDEX IF NOT EXISTS idx_audit_type ON audit_events (event_type);",
        )?;

        let version: Option<i64> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        match version {
            None => {
                conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [SCHEMA_VERSION])?;
            }
            Some(v) if v == SCHEMA_VERSION => {}
            Some(v) => {
                return Err(StoreError::Conflict(format!(
                    "audit schema version {v} unsupported (expected {SCHEMA_VERSION})"
                )));
            }
        }

        let capacity = ring_capacity.max(1);
        let store = Self {
            ring: Mutex::new(Ring {
                events: VecDeque::with_capacity(capacity),
                ids: HashSet::new(),
                capacity,
            }),
            db: Mutex::new(conn),
        };
        store.reload_ring()?;
        Ok(store)
    }

    /// Record an event to both tiers.
    ///
    /// Enriches a blank id with a fresh UUID; explicit timestamps are kept
    /// as-is so replays and tests may backdate. Durable write failures are
    /// logged and swallowed.
    pub fn record(&self, mut event: AuditEvent) {
        if event.id.is_empty() {
            event.id = uuid::Uuid::new_v4().to_string();
        }

        let fresh = match self.ring.lock() {
            Ok(mut ring) => ring.push(event.clone()),
            Err(_) => false,
        };
        if !fresh {
            return;
        }

        if let Err(e) = self.insert_durable(&event) {
            tracing::warn!(event_id = %event.id, err = %e, "durable audit write failed");
        }
    }

    /// Convenience: record a minimal event.
    pub fn emit(
        &self,
        event_type: &str,
        probe_id: Option<&str>,
        actor: &str,
        summary: impl Into<String>,
    ) {
        let mut ev = AuditEvent::new(event_type, actor, summary);
        ev.probe_id = probe_id.map(str::to_owned);
        self.record(ev);
    }

    fn insert_durable(&self, ev: &AuditEvent) -> Result<(), StoreError> {
        let db = self.db.lock().map_err(|_| StoreError::NotFound)?;
        db.execute(
            "INSERT OR IGNORE INTO audit_events
             (id, ts_micros, event_type, probe_id, actor, summary, detail, before_state, after_state)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                ev.id,
                ev.timestamp.timestamp_micros(),
                ev.event_type,
                ev.probe_id,
                ev.actor,
                ev.summary,
                ev.detail.as_ref().map(|v| v.to_string()),
                ev.before.as_ref().map(|v| v.to_string()),
                ev.after.as_ref().map(|v| v.to_string()),
            ],
        )?;
        Ok(())
    }

    /// Query the in-memory ring, newest first.
    pub fn query(&self, filter: &AuditFilter) -> Vec<AuditEvent> {
        let Ok(ring) = self.ring.lock() else {
            return Vec::new();
        };
        let iter = ring.events.iter().rev().filter(|ev| filter.matches(ev)).cloned();
        if filter.limit > 0 {
            iter.take(filter.limit).collect()
        } else {
            iter.collect()
        }
    }

    /// Query the durable tier with keyset cursor pagination.
    ///
    /// Ordering is `(timestamp DESC, id DESC)`. The page starts strictly after
    /// the cursor row; a cursor that no longer exists yields an empty page.
    pub fn query_persisted(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>, StoreError> {
        let db = self.db.lock().map_err(|_| StoreError::NotFound)?;

        let cursor_key: Option<(i64, String)> = match filter.cursor {
            Some(ref cursor_id) => {
                let row = db
                    .query_row(
                        "SELECT ts_micros, id FROM audit_events WHERE id = ?1",
                        [cursor_id],
                        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
                    )
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(other),
                    })?;
                match row {
                    Some(key) => Some(key),
                    None => return Ok(Vec::new()),
                }
            }
            None => None,
        };

        let mut sql = String::from(
            "SELECT id, ts_micros, event_type, probe_id, actor, summary, detail, before_state, after_state
             FROM audit_events WHERE 1=1",
        );
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref p) = filter.probe_id {
            sql.push_str(" AND probe_id = ?");
            args.push(Box::new(p.clone()));
        }
        if let Some(ref t) = filter.event_type {
            sql.push_str(" AND event_type = ?");
            args.push(Box::new(t.clone()));
        }
        if let Some(since) = filter.since {
            sql.push_str(" AND ts_micros >= ?");
            args.push(Box::new(since.timestamp_micros()));
        }
        if let Some(until) = filter.until {
            sql.push_str(" AND ts_micros <= ?");
            args.push(Box::new(until.timestamp_micros()));
        }
        if let Some((c_ts, c_id)) = cursor_key {
            sql.push_str(" AND (ts_micros < ? OR (ts_micros = ? AND id < ?))");
            args.push(Box::new(c_ts));
            args.push(Box::new(c_ts));
            args.push(Box::new(c_id));
        }
        sql.push_str(" ORDER BY ts_micros DESC, id DESC");
        if filter.limit > 0 {
            sql.push_str(" LIMIT ?");
            args.push(Box::new(filter.limit as i64));
        }

        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), row_to_event)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Stream matching durable events as JSON Lines.
    pub fn stream_jsonl(
        &self,
        writer: &mut dyn Write,
        filter: &AuditFilter,
    ) -> Result<(), StoreError> {
        for ev in self.query_persisted(filter)? {
            let line = serde_json::to_string(&ev).unwrap_or_default();
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Stream matching durable events as CSV. Projects the fixed columns
    /// id, timestamp, type, probe_id, actor, summary.
    pub fn stream_csv(
        &self,
        writer: &mut dyn Write,
        filter: &AuditFilter,
    ) -> Result<(), StoreError> {
        writer.write_all(b"id,timestamp,type,probe_id,actor,summary\n")?;
        for ev in self.query_persisted(filter)? {
            let line = format!(
                "{},{},{},{},{},{}\n",
                csv_field(&ev.id),
                csv_field(&ev.timestamp.to_rfc3339()),
                csv_field(&ev.event_type),
                csv_field(ev.probe_id.as_deref().unwrap_or("")),
                csv_field(&ev.actor),
                csv_field(&ev.summary),
            );
            writer.write_all(line.as_bytes())?;
        }
        Ok(())
    }

    /// Delete durable rows older than `older_than`, then rebuild the ring.
    pub fn purge(&self, older_than: Duration) -> Result<u64, StoreError> {
        let cutoff = Utc::now().timestamp_micros()
            - i64::try_from(older_than.as_micros()).unwrap_or(i64::MAX);
        let deleted = {
            let db = self.db.lock().map_err(|_| StoreError::NotFound)?;
            db.execute("DELETE FROM audit_events WHERE ts_micros < ?1", [cutoff])? as u64
        };
        self.reload_ring()?;
        Ok(deleted)
    }

    /// Durable row count.
    pub fn count(&self) -> Result<u64, StoreError> {
        let db = self.db.lock().map_err(|_| StoreError::NotFound)?;
        let n: i64 = db.query_row("SELECT COUNT(*) FROM audit_events", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Rebuild the ring from the newest durable rows.
    fn reload_ring(&self) -> Result<(), StoreError> {
        let capacity = self.ring.lock().map(|r| r.capacity).unwrap_or(1);
        let newest = self.query_persisted(&AuditFilter { limit: capacity, ..Default::default() })?;

        let Ok(mut ring) = self.ring.lock() else {
            return Ok(());
        };
        ring.events.clear();
        ring.ids.clear();
        for ev in newest.into_iter().rev() {
            ring.push(ev);
        }
        Ok(())
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEvent> {
    let ts_micros: i64 = row.get(1)?;
    let timestamp = DateTime::from_timestamp_micros(ts_micros).unwrap_or_else(Utc::now);
    let detail: Option<String> = row.get(6)?;
    let before: Option<String> = row.get(7)?;
    let after: Option<String> = row.get(8)?;
    Ok(AuditEvent {
        id: row.get(0)?,
        timestamp,
        event_type: row.get(2)?,
        probe_id: row.get(3)?,
        actor: row.get(4)?,
        summary: row.get(5)?,
        detail: detail.and_then(|s| serde_json::from_str(&s).ok()),
        before: before.and_then(|s| serde_json::from_str(&s).ok()),
        after: after.and_then(|s| serde_json::from_str(&s).ok()),
    })
}

/// Quote a CSV field when it contains a delimiter, quote, or newline.
fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_owned()
    }
}

#[cfg(test)]
#[path = "audit_tests.rs"]
mod tests;
