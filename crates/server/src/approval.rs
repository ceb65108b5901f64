// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Human-approval queue for commands that exceed a probe's capability.
//!
//! Requests move `pending -> approved | denied | expired` exactly once. An
//! approval triggers the injected dispatcher exactly once; a dispatch failure
//! surfaces to the decider but the approval stays terminal.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use legator_protocol::CommandRequest;

use crate::audit::{AuditEvent, AuditStore};
use crate::events::{Event, EventBus};
use crate::policy::{CapabilityLevel, RiskLevel};

/// Decision states. Monotonic: pending is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Pending,
    Approved,
    Denied,
    Expired,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::Expired => "expired",
        }
    }
}

/// A queued approval request.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub probe_id: String,
    pub command: CommandRequest,
    pub policy_level_at_submit: CapabilityLevel,
    pub reason: String,
    pub risk: RiskLevel,
    pub requested_by: String,
    pub decision: Decision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

struct Entry {
    request: ApprovalRequest,
    done: watch::Sender<Decision>,
}

/// Dispatch callback invoked on approval. Injected at startup so the queue
/// never holds a reference to the hub.
pub type ApprovalDispatcher =
    Arc<dyn Fn(ApprovalRequest) -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// Errors from queue operations.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("approval not found")]
    NotFound,

    #[error("approval already {0}")]
    AlreadyDecided(&'static str),

    #[error("approved but dispatch failed: {error}")]
    DispatchFailed { request: Box<ApprovalRequest>, error: String },

    #[error("timed out waiting for decision")]
    WaitTimeout,
}

pub struct ApprovalQueue {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
    max_pending: usize,
    dispatcher: Mutex<Option<ApprovalDispatcher>>,
    audit: Arc<AuditStore>,
    bus: Arc<EventBus>,
}

impl ApprovalQueue {
    pub fn new(
        ttl: Duration,
        max_pending: usize,
        audit: Arc<AuditStore>,
        bus: Arc<EventBus>,
    ) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_pending: max_pending.max(1),
            dispatcher: Mutex::new(None),
            audit,
            bus,
        })
    }

    /// Wire the dispatch-on-approval edge. Called once at startup.
    pub fn set_dispatcher(&self, dispatcher: ApprovalDispatcher) {
        if let Ok(mut slot) = self.dispatcher.lock() {
            *slot = Some(dispatcher);
        }
    }

    /// Queue a command for approval.
    pub fn submit(
        &self,
        probe_id: &str,
        command: CommandRequest,
        reason: &str,
        risk: RiskLevel,
        level: CapabilityLevel,
        requested_by: &str,
    ) -> ApprovalRequest {
        let now = Utc::now();
        let request = ApprovalRequest {
            id: uuid::Uuid::new_v4().to_string(),
            probe_id: probe_id.to_owned(),
            command,
            policy_level_at_submit: level,
            reason: reason.to_owned(),
            risk,
            requested_by: requested_by.to_owned(),
            decision: Decision::Pending,
            decided_by: None,
            decided_at: None,
            created_at: now,
            expires_at: now + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::minutes(15)),
        };

        let overflow = {
            let Ok(mut entries) = self.entries.lock() else {
                return request;
            };

            // Bounded queue: expire the oldest pending entry on overflow.
            let mut overflow = None;
            let pending = entries.values().filter(|e| e.request.decision == Decision::Pending).count();
            if pending >= self.max_pending {
                if let Some(oldest_id) = entries
                    .values()
                    .filter(|e| e.request.decision == Decision::Pending)
                    .min_by_key(|e| e.request.created_at)
                    .map(|e| e.request.id.clone())
                {
                    if let Some(entry) = entries.get_mut(&oldest_id) {
                        entry.request.decision = Decision::Expired;
                        entry.request.decided_at = Some(now);
                        let _ = entry.done.send(Decision::Expired);
                        overflow = Some(entry.request.clone());
                    }
                }
            }

            let (done, _) = watch::channel(Decision::Pending);
            entries.insert(request.id.clone(), Entry { request: request.clone(), done });
            overflow
        };

        if let Some(expired) = overflow {
            self.audit.emit(
                "approval.expired",
                Some(&expired.probe_id),
                "system",
                format!("approval {} expired on queue overflow", expired.id),
            );
            self.bus.publish(Event::for_probe("approval.expired", &expired.probe_id));
        }

        self.audit.record(
            AuditEvent::new(
                "approval.requested",
                &request.requested_by,
                format!("approval requested for `{}` on {probe_id}", request.command.command),
            )
            .probe(probe_id)
            .with_detail(serde_json::json!({
                "approval_id": request.id,
                "risk": request.risk.as_str(),
                "reason": request.reason,
            })),
        );
        self.bus.publish(
            Event::for_probe("approval.requested", probe_id)
                .with_data(serde_json::json!({ "approval_id": request.id })),
        );
        request
    }

    pub fn get(&self, id: &str) -> Option<ApprovalRequest> {
        self.entries.lock().ok()?.get(id).map(|e| e.request.clone())
    }

    pub fn pending(&self) -> Vec<ApprovalRequest> {
        let Ok(entries) = self.entries.lock() else {
            return Vec::new();
        };
        let mut out: Vec<ApprovalRequest> = entries
            .values()
            .filter(|e| e.request.decision == Decision::Pending)
            .map(|e| e.request.clone())
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    pub fn pending_count(&self) -> usize {
        self.entries
            .lock()
            .map(|e| e.values().filter(|e| e.request.decision == Decision::Pending).count())
            .unwrap_or(0)
    }

    /// Newest-first listing across all states. Zero limit means everything.
    pub fn all(&self, limit: usize) -> Vec<ApprovalRequest> {
        let Ok(entries) = self.entries.lock() else {
            return Vec::new();
        };
        let mut out: Vec<ApprovalRequest> = entries.values().map(|e| e.request.clone()).collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if limit > 0 {
            out.truncate(limit);
        }
        out
    }

    /// Decide a pending request. Approvals trigger the dispatcher exactly
    /// once; the terminal-state check makes a second decide fail before it
    /// can dispatch again.
    pub async fn decide(
        &self,
        id: &str,
        approve: bool,
        decided_by: &str,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let decided = {
            let Ok(mut entries) = self.entries.lock() else {
                return Err(ApprovalError::NotFound);
            };
            let entry = entries.get_mut(id).ok_or(ApprovalError::NotFound)?;
            match entry.request.decision {
                Decision::Pending => {}
                other => return Err(ApprovalError::AlreadyDecided(other.as_str())),
            }

            entry.request.decision = if approve { Decision::Approved } else { Decision::Denied };
            entry.request.decided_by = Some(decided_by.to_owned());
            entry.request.decided_at = Some(Utc::now());
            let _ = entry.done.send(entry.request.decision);
            entry.request.clone()
        };

        self.audit.record(
            AuditEvent::new(
                "approval.decided",
                decided_by,
                format!("approval {} {}", decided.id, decided.decision.as_str()),
            )
            .probe(&decided.probe_id)
            .with_detail(serde_json::json!({
                "approval_id": decided.id,
                "decision": decided.decision.as_str(),
                "risk": decided.risk.as_str(),
            })),
        );
        self.bus.publish(
            Event::for_probe("approval.decided", &decided.probe_id).with_data(serde_json::json!({
                "approval_id": decided.id,
                "decision": decided.decision.as_str(),
            })),
        );

        if decided.decision == Decision::Approved {
            let dispatcher = self.dispatcher.lock().ok().and_then(|d| d.clone());
            if let Some(dispatch) = dispatcher {
                if let Err(error) = dispatch(decided.clone()).await {
                    // The approval stays approved; it is not retried.
                    return Err(ApprovalError::DispatchFailed {
                        request: Box::new(decided),
                        error,
                    });
                }
            }
        }
        Ok(decided)
    }

    /// Block until the request reaches a terminal state or `timeout` passes.
    pub async fn wait_for_decision(
        &self,
        id: &str,
        timeout: Duration,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let mut rx = {
            let Ok(entries) = self.entries.lock() else {
                return Err(ApprovalError::NotFound);
            };
            let entry = entries.get(id).ok_or(ApprovalError::NotFound)?;
            if entry.request.decision != Decision::Pending {
                return Ok(entry.request.clone());
            }
            entry.done.subscribe()
        };

        let wait = async {
            loop {
                if *rx.borrow_and_update() != Decision::Pending {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        };
        if tokio::time::timeout(timeout, wait).await.is_err() {
            return Err(ApprovalError::WaitTimeout);
        }
        self.get(id).ok_or(ApprovalError::NotFound)
    }

    /// Expire pending requests past their deadline. Returns how many crossed.
    pub fn reap(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<ApprovalRequest> = {
            let Ok(mut entries) = self.entries.lock() else {
                return 0;
            };
            let mut expired = Vec::new();
            for entry in entries.values_mut() {
                if entry.request.decision == Decision::Pending && entry.request.expires_at <= now {
                    entry.request.decision = Decision::Expired;
                    entry.request.decided_at = Some(now);
                    let _ = entry.done.send(Decision::Expired);
                    expired.push(entry.request.clone());
                }
            }
            expired
        };

        for request in &expired {
            self.audit.emit(
                "approval.expired",
                Some(&request.probe_id),
                "system",
                format!("approval {} expired unanswered", request.id),
            );
            self.bus.publish(
                Event::for_probe("approval.expired", &request.probe_id)
                    .with_data(serde_json::json!({ "approval_id": request.id })),
            );
        }
        expired.len()
    }

    /// Background reaper. Runs until the shutdown token fires.
    pub fn start_reaper(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = timer.tick() => {}
                }
                let n = queue.reap();
                if n > 0 {
                    tracing::info!(expired = n, "approval reaper expired pending requests");
                }
            }
        });
    }
}

#[cfg(test)]
#[path = "approval_tests.rs"]
mod tests;
