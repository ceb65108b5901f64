// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Output-chunk fan-out.
//!
//! Streaming commands produce `output_chunk` frames; every subscriber for a
//! request id receives every chunk. Delivery uses `try_send` so a stalled
//! subscriber loses chunks instead of blocking the session reader.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;

use legator_protocol::OutputChunk;

struct ChunkSub {
    id: u64,
    tx: mpsc::Sender<OutputChunk>,
}

pub struct StreamRegistry {
    subs: Mutex<HashMap<String, Vec<ChunkSub>>>,
    next_id: AtomicU64,
}

/// A live chunk subscription. Dropping it unsubscribes.
pub struct ChunkSubscription {
    pub rx: mpsc::Receiver<OutputChunk>,
    registry: Arc<StreamRegistry>,
    request_id: String,
    sub_id: u64,
}

impl Drop for ChunkSubscription {
    fn drop(&mut self) {
        self.registry.remove(&self.request_id, self.sub_id);
    }
}

impl Stream for ChunkSubscription {
    type Item = OutputChunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<OutputChunk>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self { subs: Mutex::new(HashMap::new()), next_id: AtomicU64::new(1) }
    }

    /// Subscribe to chunks for one request id. Multiple concurrent
    /// subscribers are fine; each receives every chunk.
    pub fn subscribe(self: &Arc<Self>, request_id: &str, buffer: usize) -> ChunkSubscription {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let sub_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut subs) = self.subs.lock() {
            subs.entry(request_id.to_owned()).or_default().push(ChunkSub { id: sub_id, tx });
        }
        ChunkSubscription {
            rx,
            registry: Arc::clone(self),
            request_id: request_id.to_owned(),
            sub_id,
        }
    }

    /// Fan a chunk out to all subscribers of its request id. The final chunk
    /// closes the subscription list for that id.
    pub fn dispatch(&self, chunk: &OutputChunk) {
        let Ok(mut subs) = self.subs.lock() else {
            return;
        };
        if let Some(list) = subs.get_mut(&chunk.request_id) {
            list.retain(|sub| match sub.tx.try_send(chunk.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::debug!(request_id = %chunk.request_id, "chunk subscriber full, dropping subscriber");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
        }
        if chunk.is_final {
            subs.remove(&chunk.request_id);
        }
    }

    fn remove(&self, request_id: &str, sub_id: u64) {
        let Ok(mut subs) = self.subs.lock() else {
            return;
        };
        if let Some(list) = subs.get_mut(request_id) {
            list.retain(|sub| sub.id != sub_id);
            if list.is_empty() {
                subs.remove(request_id);
            }
        }
    }

    pub fn subscriber_count(&self, request_id: &str) -> usize {
        self.subs.lock().map(|s| s.get(request_id).map_or(0, Vec::len)).unwrap_or(0)
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}
