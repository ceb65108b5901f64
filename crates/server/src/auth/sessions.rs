// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server-side web sessions (`sessions.db`).
//!
//! Session ids are opaque random tokens. Validation refreshes the idle
//! window up to an absolute expiry; a background reaper deletes expired rows.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use rusqlite::{params, Connection};

use crate::storage::{open_db, open_memory_db, StoreError};

/// Idle window: a session unused this long expires early.
const IDLE_WINDOW_HOURS: i64 = 24;
/// Absolute lifetime from creation.
const ABSOLUTE_LIFETIME_DAYS: i64 = 7;

pub struct SessionStore {
    db: Mutex<Connection>,
}

impl SessionStore {
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        Self::init(open_db(dir, "sessions.db")?)
    }

    pub fn open_ephemeral() -> Result<Self, StoreError> {
        Self::init(open_memory_db()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                 id             TEXT PRIMARY KEY,
                 user_id        TEXT NOT NULL,
                 created_us     INTEGER NOT NULL,
                 expires_us     INTEGER NOT NULL,
                 last_active_us INTEGER NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions (user_id);",
        )?;
        Ok(Self { db: Mutex::new(conn) })
    }

    /// Create a session for a user, returning the opaque id.
    pub fn create(&self, user_id: &str) -> Result<String, StoreError> {
        let id: String = format!(
            "sess_{}",
            rand::rng().sample_iter(&Alphanumeric).take(48).map(char::from).collect::<String>()
        );
        let now = Utc::now();
        let db = self.db.lock().map_err(|_| StoreError::NotFound)?;
        db.execute(
            "INSERT INTO sessions (id, user_id, created_us, expires_us, last_active_us)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                user_id,
                now.timestamp_micros(),
                (now + Duration::days(ABSOLUTE_LIFETIME_DAYS)).timestamp_micros(),
                now.timestamp_micros(),
            ],
        )?;
        Ok(id)
    }

    /// Validate a session id, refreshing its idle window. Expired sessions
    /// are deleted on the spot and `None` returned.
    pub fn validate(&self, id: &str) -> Option<String> {
        let db = self.db.lock().ok()?;
        let row: Option<(String, i64, i64)> = db
            .query_row(
                "SELECT user_id, expires_us, last_active_us FROM sessions WHERE id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .ok();
        let (user_id, expires_us, last_active_us) = row?;

        let now = Utc::now();
        let absolute = micros(expires_us);
        let idle_deadline = micros(last_active_us) + Duration::hours(IDLE_WINDOW_HOURS);
        if now > absolute || now > idle_deadline {
            let _ = db.execute("DELETE FROM sessions WHERE id = ?1", [id]);
            return None;
        }

        let _ = db.execute(
            "UPDATE sessions SET last_active_us = ?2 WHERE id = ?1",
            params![id, now.timestamp_micros()],
        );
        Some(user_id)
    }

    /// Explicit logout.
    pub fn delete(&self, id: &str) {
        if let Ok(db) = self.db.lock() {
            let _ = db.execute("DELETE FROM sessions WHERE id = ?1", [id]);
        }
    }

    /// Drop every session belonging to a user (disable/delete flows).
    pub fn delete_for_user(&self, user_id: &str) {
        if let Ok(db) = self.db.lock() {
            let _ = db.execute("DELETE FROM sessions WHERE user_id = ?1", [user_id]);
        }
    }

    /// Delete expired rows; returns how many were removed.
    pub fn reap_expired(&self) -> u64 {
        let Ok(db) = self.db.lock() else {
            return 0;
        };
        let now = Utc::now();
        let idle_cutoff = (now - Duration::hours(IDLE_WINDOW_HOURS)).timestamp_micros();
        db.execute(
            "DELETE FROM sessions WHERE expires_us < ?1 OR last_active_us < ?2",
            params![now.timestamp_micros(), idle_cutoff],
        )
        .unwrap_or(0) as u64
    }

    pub fn count(&self) -> u64 {
        let Ok(db) = self.db.lock() else {
            return 0;
        };
        db.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get::<_, i64>(0))
            .unwrap_or(0) as u64
    }
}

fn micros(us: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(us).unwrap_or_else(Utc::now)
}

#[cfg(test)]
#[path = "sessions_tests.rs"]
mod tests;
