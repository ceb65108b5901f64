// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server-sent event stream of bus events.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures_util::stream::{self, Stream, StreamExt};
use tokio::sync::mpsc;

use crate::events::{Event, EventBus};
use crate::state::AppState;

/// A bus subscription that unsubscribes when the SSE connection drops.
struct BusSubscription {
    rx: mpsc::Receiver<Event>,
    bus: Arc<EventBus>,
    id: String,
}

impl Drop for BusSubscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.id);
    }
}

impl Stream for BusSubscription {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// `GET /api/v1/events` — one `event: <type>` / `data: <json>` frame per bus
/// event. The request context closing tears the subscription down.
pub async fn events_stream(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    let id = format!("sse-{}", uuid::Uuid::new_v4());
    let rx = s.bus.subscribe(id.clone());
    let subscription = BusSubscription { rx, bus: Arc::clone(&s.bus), id };

    let events = subscription.map(|event| {
        Ok::<SseEvent, std::convert::Infallible>(
            SseEvent::default()
                .event(event.event_type.clone())
                .data(serde_json::to_string(&event).unwrap_or_default()),
        )
    });
    let connected = stream::once(async { Ok(SseEvent::default().comment("connected")) });

    Sse::new(connected.chain(events))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keep-alive"))
}
