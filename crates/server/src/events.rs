// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process event bus with per-subscriber bounded channels.
//!
//! `publish` never blocks: each subscriber has its own bounded channel and a
//! full channel drops the event for that subscriber only. Slow consumers lose
//! frames; they never starve the publisher or their peers.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Default per-subscriber channel capacity.
const SUBSCRIBER_CAPACITY: usize = 256;

/// An event on the bus. `event_type` uses dotted names (`probe.connected`,
/// `approval.decided`, ...); `data` is a free-form JSON detail object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            probe_id: None,
            timestamp: Some(Utc::now()),
            data: serde_json::Value::Null,
        }
    }

    pub fn for_probe(event_type: impl Into<String>, probe_id: impl Into<String>) -> Self {
        let mut ev = Self::new(event_type);
        ev.probe_id = Some(probe_id.into());
        ev
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Publish/subscribe bus. Subscriber ids are caller-chosen opaque strings.
pub struct EventBus {
    subscribers: RwLock<HashMap<String, mpsc::Sender<Event>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self { subscribers: RwLock::new(HashMap::new()) }
    }

    /// Register a subscriber and return its receiving end.
    ///
    /// Subscribing with an existing id replaces the previous channel, so the
    /// operation is idempotent from the caller's point of view.
    pub fn subscribe(&self, id: impl Into<String>) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        if let Ok(mut subs) = self.subscribers.write() {
            subs.insert(id.into(), tx);
        }
        rx
    }

    /// Remove a subscriber. Unknown ids are a no-op.
    pub fn unsubscribe(&self, id: &str) {
        if let Ok(mut subs) = self.subscribers.write() {
            subs.remove(id);
        }
    }

    /// Deliver an event to every subscriber without blocking.
    ///
    /// Stamps the timestamp if the producer left it unset. Full or closed
    /// subscriber channels drop this event for that subscriber.
    pub fn publish(&self, mut event: Event) {
        if event.timestamp.is_none() {
            event.timestamp = Some(Utc::now());
        }

        let Ok(subs) = self.subscribers.read() else {
            return;
        };
        for (id, tx) in subs.iter() {
            if let Err(e) = tx.try_send(event.clone()) {
                match e {
                    mpsc::error::TrySendError::Full(_) => {
                        tracing::debug!(subscriber = %id, event = %event.event_type, "subscriber full, dropping event");
                    }
                    mpsc::error::TrySendError::Closed(_) => {}
                }
            }
        }
    }

    /// Number of live subscribers (observability).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().map(|s| s.len()).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
