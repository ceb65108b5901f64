// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Web user store (`users.db`). Passwords are bcrypt-hashed; the hash never
//! leaves this module.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::auth::Role;
use crate::storage::{map_constraint, open_db, open_memory_db, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
}

/// Why a login attempt failed.
#[derive(Debug, PartialEq, Eq)]
pub enum LoginRejection {
    UnknownUser,
    BadPassword,
    Disabled,
}

pub struct UserStore {
    db: Mutex<Connection>,
}

impl UserStore {
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        Self::init(open_db(dir, "users.db")?)
    }

    pub fn open_ephemeral() -> Result<Self, StoreError> {
        Self::init(open_memory_db()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                 id            TEXT PRIMARY KEY,
                 username      TEXT NOT NULL UNIQUE,
                 display_name  TEXT NOT NULL DEFAULT '',
                 hash          TEXT NOT NULL,
                 role          TEXT NOT NULL,
                 enabled       INTEGER NOT NULL DEFAULT 1,
                 last_login_us INTEGER
             );",
        )?;
        Ok(Self { db: Mutex::new(conn) })
    }

    pub fn create(
        &self,
        username: &str,
        display_name: &str,
        password: &str,
        role: Role,
    ) -> Result<User, StoreError> {
        let hash = bcrypt::hash(password, bcrypt::DEFAULT_COST)
            .map_err(|e| StoreError::Conflict(format!("bcrypt failure: {e}")))?;
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_owned(),
            display_name: display_name.to_owned(),
            role,
            enabled: true,
            last_login: None,
        };
        let db = self.db.lock().map_err(|_| StoreError::NotFound)?;
        db.execute(
            "INSERT INTO users (id, username, display_name, hash, role, enabled)
             VALUES (?1, ?2, ?3, ?4, ?5, 1)",
            params![user.id, user.username, user.display_name, hash, role.as_str()],
        )
        .map_err(|e| map_constraint(e, "username"))?;
        Ok(user)
    }

    /// Create the bootstrap admin when no users exist. Returns the generated
    /// password for a one-time startup printout.
    pub fn bootstrap_admin(&self) -> Result<Option<String>, StoreError> {
        {
            let db = self.db.lock().map_err(|_| StoreError::NotFound)?;
            let count: i64 = db.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
            if count > 0 {
                return Ok(None);
            }
        }
        let password: String =
            rand::rng().sample_iter(&Alphanumeric).take(24).map(char::from).collect();
        self.create("admin", "Administrator", &password, Role::Admin)?;
        Ok(Some(password))
    }

    /// Verify a username/password pair and stamp last login on success.
    pub fn verify_login(&self, username: &str, password: &str) -> Result<User, LoginRejection> {
        let row = {
            let db = self.db.lock().map_err(|_| LoginRejection::UnknownUser)?;
            db.query_row(
                "SELECT id, username, display_name, hash, role, enabled, last_login_us
                 FROM users WHERE username = ?1",
                [username],
                row_to_user_with_hash,
            )
            .map_err(|_| LoginRejection::UnknownUser)?
        };
        let (user, hash) = row;
        if !bcrypt::verify(password, &hash).unwrap_or(false) {
            return Err(LoginRejection::BadPassword);
        }
        if !user.enabled {
            return Err(LoginRejection::Disabled);
        }
        if let Ok(db) = self.db.lock() {
            let _ = db.execute(
                "UPDATE users SET last_login_us = ?2 WHERE id = ?1",
                params![user.id, Utc::now().timestamp_micros()],
            );
        }
        Ok(user)
    }

    pub fn get(&self, id: &str) -> Result<User, StoreError> {
        let db = self.db.lock().map_err(|_| StoreError::NotFound)?;
        db.query_row(
            "SELECT id, username, display_name, hash, role, enabled, last_login_us
             FROM users WHERE id = ?1",
            [id],
            row_to_user_with_hash,
        )
        .map(|(user, _)| user)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
            other => StoreError::Sqlite(other),
        })
    }

    pub fn list(&self) -> Result<Vec<User>, StoreError> {
        let db = self.db.lock().map_err(|_| StoreError::NotFound)?;
        let mut stmt = db.prepare(
            "SELECT id, username, display_name, hash, role, enabled, last_login_us
             FROM users ORDER BY username",
        )?;
        let rows = stmt.query_map([], row_to_user_with_hash)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.0);
        }
        Ok(out)
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), StoreError> {
        let db = self.db.lock().map_err(|_| StoreError::NotFound)?;
        let n = db
            .execute("UPDATE users SET enabled = ?2 WHERE id = ?1", params![id, i64::from(enabled)])?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        let db = self.db.lock().map_err(|_| StoreError::NotFound)?;
        let n = db.execute("DELETE FROM users WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[allow(clippy::type_complexity)]
fn row_to_user_with_hash(row: &rusqlite::Row<'_>) -> rusqlite::Result<(User, String)> {
    let role: String = row.get(4)?;
    Ok((
        User {
            id: row.get(0)?,
            username: row.get(1)?,
            display_name: row.get(2)?,
            role: Role::parse(&role).unwrap_or(Role::Viewer),
            enabled: row.get::<_, i64>(5)? != 0,
            last_login: row
                .get::<_, Option<i64>>(6)?
                .and_then(DateTime::from_timestamp_micros),
        },
        row.get(3)?,
    ))
}

#[cfg(test)]
#[path = "users_tests.rs"]
mod tests;
