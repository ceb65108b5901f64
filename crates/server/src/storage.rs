// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SQLite open helper shared by the durable stores.
//!
//! Each subsystem owns its own database file under the data directory. Every
//! connection opens with WAL and a busy timeout; write rates are low enough
//! that serialising writers through the database lock is fine.

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;
use thiserror::Error;

/// Errors from the durable stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("row not found")]
    NotFound,

    #[error("unique constraint violated: {0}")]
    Conflict(String),
}

/// Open (or create) a database file with WAL mode and a busy timeout.
pub fn open_db(dir: &Path, file: &str) -> Result<Connection, StoreError> {
    std::fs::create_dir_all(dir)?;
    let conn = Connection::open(dir.join(file))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(conn)
}

/// Open an in-memory database (tests and ephemeral deployments).
pub fn open_memory_db() -> Result<Connection, StoreError> {
    let conn = Connection::open_in_memory()?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

/// Map a sqlite unique-constraint failure to [`StoreError::Conflict`].
pub fn map_constraint(err: rusqlite::Error, what: &str) -> StoreError {
    if let rusqlite::Error::SqliteFailure(code, _) = &err {
        if code.code == rusqlite::ErrorCode::ConstraintViolation {
            return StoreError::Conflict(what.to_owned());
        }
    }
    StoreError::Sqlite(err)
}
