// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pending-command tracker.
//!
//! Correlates outbound commands with inbound results by request id. Each
//! pending entry owns a single-consumer result channel: the first `complete`
//! delivers, every later one is a no-op.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use legator_protocol::CommandResult;

use crate::policy::CapabilityLevel;

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique request id.
pub fn next_request_id() -> String {
    format!("req-{}", REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Observable state of one pending command.
#[derive(Debug, Clone, Serialize)]
pub struct PendingInfo {
    pub request_id: String,
    pub probe_id: String,
    pub command: String,
    pub level: CapabilityLevel,
    pub tracked_at: DateTime<Utc>,
}

struct PendingEntry {
    info: PendingInfo,
    deadline: Instant,
    tx: Option<oneshot::Sender<CommandResult>>,
}

/// Errors from tracking.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("request id {0} is already tracked")]
    Duplicate(String),
}

pub struct CommandTracker {
    entries: Mutex<HashMap<String, PendingEntry>>,
    deadline: Duration,
}

impl CommandTracker {
    pub fn new(deadline: Duration) -> Self {
        Self { entries: Mutex::new(HashMap::new()), deadline }
    }

    /// Register a pending command and return its result channel.
    pub fn track(
        &self,
        request_id: &str,
        probe_id: &str,
        command: &str,
        level: CapabilityLevel,
    ) -> Result<oneshot::Receiver<CommandResult>, TrackerError> {
        let (tx, rx) = oneshot::channel();
        let entry = PendingEntry {
            info: PendingInfo {
                request_id: request_id.to_owned(),
                probe_id: probe_id.to_owned(),
                command: command.to_owned(),
                level,
                tracked_at: Utc::now(),
            },
            deadline: Instant::now() + self.deadline,
            tx: Some(tx),
        };

        let Ok(mut entries) = self.entries.lock() else {
            return Err(TrackerError::Duplicate(request_id.to_owned()));
        };
        if entries.contains_key(request_id) {
            return Err(TrackerError::Duplicate(request_id.to_owned()));
        }
        entries.insert(request_id.to_owned(), entry);
        Ok(rx)
    }

    /// Deliver a result to the waiter. Idempotent: the entry is consumed on
    /// the first call and later calls (or results for untracked ids) return
    /// false without effect.
    pub fn complete(&self, request_id: &str, result: CommandResult) -> bool {
        let Ok(mut entries) = self.entries.lock() else {
            return false;
        };
        let Some(mut entry) = entries.remove(request_id) else {
            return false;
        };
        match entry.tx.take() {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    /// Drop a pending entry; the waiter observes a closed channel.
    pub fn cancel(&self, request_id: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(request_id);
        }
    }

    /// Remove entries past their deadline; waiters observe closed channels.
    pub fn sweep_expired(&self) -> Vec<String> {
        let Ok(mut entries) = self.entries.lock() else {
            return Vec::new();
        };
        let now = Instant::now();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            entries.remove(id);
        }
        expired
    }

    pub fn list_pending(&self) -> Vec<PendingInfo> {
        let Ok(entries) = self.entries.lock() else {
            return Vec::new();
        };
        let mut out: Vec<PendingInfo> = entries.values().map(|e| e.info.clone()).collect();
        out.sort_by(|a, b| a.request_id.cmp(&b.request_id));
        out
    }

    pub fn in_flight(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
}

#[cfg(test)]
#[path = "tracker_tests.rs"]
mod tests;
