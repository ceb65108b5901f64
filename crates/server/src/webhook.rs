// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Webhook targets and the event-bus forwarder.
//!
//! The core owns the target registry (`webhooks.db`) and one bus subscriber
//! that matches events against enabled targets; delivering the HTTP request
//! itself is the external notifier's job, reached through [`WebhookSink`].

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use rusqlite::{params, Connection};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::events::{Event, EventBus};
use crate::storage::{open_db, open_memory_db, StoreError};

/// Subscriber id the forwarder registers on the bus.
const SUBSCRIBER_ID: &str = "webhook-forwarder";

/// A registered webhook target.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookTarget {
    pub id: String,
    pub url: String,
    /// Only events whose type starts with this prefix are forwarded.
    /// Empty matches everything.
    pub event_prefix: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl WebhookTarget {
    fn matches(&self, event_type: &str) -> bool {
        self.event_prefix.is_empty() || event_type.starts_with(&self.event_prefix)
    }
}

/// Delivery boundary implemented by the external webhook notifier.
pub trait WebhookSink: Send + Sync {
    fn deliver(&self, target: WebhookTarget, event: Event)
        -> BoxFuture<'static, Result<(), String>>;
}

/// Default sink for deployments without a notifier: logs and drops.
pub struct NoopSink;

impl WebhookSink for NoopSink {
    fn deliver(
        &self,
        target: WebhookTarget,
        event: Event,
    ) -> BoxFuture<'static, Result<(), String>> {
        Box::pin(async move {
            tracing::debug!(url = %target.url, event = %event.event_type, "no webhook notifier configured, dropping");
            Ok(())
        })
    }
}

// -- Target store -------------------------------------------------------------

/// Durable webhook target registry (`webhooks.db`).
pub struct WebhookStore {
    db: Mutex<Connection>,
}

impl WebhookStore {
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        Self::init(open_db(dir, "webhooks.db")?)
    }

    pub fn open_ephemeral() -> Result<Self, StoreError> {
        Self::init(open_memory_db()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS webhooks (
                 id           TEXT PRIMARY KEY,
                 url          TEXT NOT NULL,
                 event_prefix TEXT NOT NULL DEFAULT '',
                 enabled      INTEGER NOT NULL DEFAULT 1,
                 created_us   INTEGER NOT NULL
             );",
        )?;
        Ok(Self { db: Mutex::new(conn) })
    }

    pub fn create(&self, url: &str, event_prefix: &str) -> Result<WebhookTarget, StoreError> {
        let target = WebhookTarget {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.to_owned(),
            event_prefix: event_prefix.to_owned(),
            enabled: true,
            created_at: Utc::now(),
        };
        let db = self.db.lock().map_err(|_| StoreError::NotFound)?;
        db.execute(
            "INSERT INTO webhooks (id, url, event_prefix, enabled, created_us)
             VALUES (?1, ?2, ?3, 1, ?4)",
            params![target.id, target.url, target.event_prefix, target.created_at.timestamp_micros()],
        )?;
        Ok(target)
    }

    pub fn list(&self) -> Result<Vec<WebhookTarget>, StoreError> {
        self.select("SELECT id, url, event_prefix, enabled, created_us FROM webhooks ORDER BY created_us")
    }

    pub fn list_enabled(&self) -> Result<Vec<WebhookTarget>, StoreError> {
        self.select(
            "SELECT id, url, event_prefix, enabled, created_us FROM webhooks
             WHERE enabled = 1 ORDER BY created_us",
        )
    }

    fn select(&self, sql: &str) -> Result<Vec<WebhookTarget>, StoreError> {
        let db = self.db.lock().map_err(|_| StoreError::NotFound)?;
        let mut stmt = db.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(WebhookTarget {
                id: row.get(0)?,
                url: row.get(1)?,
                event_prefix: row.get(2)?,
                enabled: row.get::<_, i64>(3)? != 0,
                created_at: DateTime::from_timestamp_micros(row.get(4)?).unwrap_or_else(Utc::now),
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
            "UPDATE webhooks SET enabled = ?2 WHERE id = ?1",
            params![id, i64::from(enabled)],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        let db = self.db.lock().map_err(|_| StoreError::NotFound)?;
        let n = db.execute("DELETE FROM webhooks WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

// -- Forwarder ----------------------------------------------------------------

/// Spawn the forwarder task: one bus subscriber, every event, fanned to the
/// enabled targets that match. Delivery failures are logged and the stream
/// continues.
pub fn spawn_forwarder(
    bus: Arc<EventBus>,
    store: Arc<WebhookStore>,
    sink: Arc<dyn WebhookSink>,
    shutdown: CancellationToken,
) {
    let mut rx = bus.subscribe(SUBSCRIBER_ID);
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let targets = match store.list_enabled() {
                Ok(targets) => targets,
                Err(e) => {
                    tracing::warn!(err = %e, "webhook target listing failed");
                    continue;
                }
            };
            for target in targets {
                if !target.matches(&event.event_type) {
                    continue;
                }
                let url = target.url.clone();
                if let Err(e) = sink.deliver(target, event.clone()).await {
                    tracing::warn!(url = %url, event = %event.event_type, err = %e, "webhook delivery failed");
                }
            }
        }
        bus.unsubscribe(SUBSCRIBER_ID);
    });
}

#[cfg(test)]
#[path = "webhook_tests.rs"]
mod tests;
