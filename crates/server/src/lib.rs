// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Legator: control plane for probe fleets.

pub mod approval;
pub mod audit;
pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod fleet;
pub mod hub;
pub mod policy;
pub mod state;
pub mod storage;
pub mod tracker;
pub mod transport;
pub mod webhook;

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::audit::AuditEvent;
use crate::config::ServerConfig;
use crate::events::Event;
use crate::hub::SessionTransition;
use crate::state::AppState;
use crate::transport::build_router;

/// Run the control plane until shutdown.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::build(config)?;

    spawn_lifecycle_task(Arc::clone(&state));
    spawn_offline_detector(Arc::clone(&state));
    spawn_session_reaper(Arc::clone(&state));
    spawn_tracker_sweeper(Arc::clone(&state));
    state
        .approvals
        .start_reaper(state.config.approval_reaper_interval(), state.shutdown.clone());
    webhook::spawn_forwarder(
        Arc::clone(&state.bus),
        Arc::clone(&state.webhooks),
        Arc::clone(&state.webhook_sink),
        state.shutdown.clone(),
    );

    // Ctrl-C drives the same cancellation token every background task and
    // session loop selects on.
    {
        let shutdown = state.shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    tracing::info!("legator listening on {addr}");
    let router = build_router(Arc::clone(&state));
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(state.shutdown.clone().cancelled_owned())
        .await?;

    Ok(())
}

/// Drain hub lifecycle transitions into fleet status and bus events. The hub
/// hooks are authoritative for connected/reconnected/disconnected; the
/// offline detector below owns `probe.offline` alone.
pub fn spawn_lifecycle_task(state: Arc<AppState>) {
    let Some(mut rx) = state.take_lifecycle_rx() else {
        return;
    };
    tokio::spawn(async move {
        loop {
            let transition = tokio::select! {
                _ = state.shutdown.cancelled() => break,
                t = rx.recv() => match t {
                    Some(t) => t,
                    None => break,
                },
            };
            match transition {
                SessionTransition::Connected { probe_id, reconnect } => {
                    if let Err(e) = state.fleet.set_online(&probe_id).await {
                        tracing::debug!(probe_id = %probe_id, err = %e, "set_online failed");
                    }
                    let event_type =
                        if reconnect { "probe.reconnected" } else { "probe.connected" };
                    state.audit.emit(
                        event_type,
                        Some(&probe_id),
                        "system",
                        format!("probe {probe_id} session opened"),
                    );
                    state.bus.publish(Event::for_probe(event_type, &probe_id));
                }
                SessionTransition::Disconnected { probe_id } => {
                    state.audit.emit(
                        "probe.disconnected",
                        Some(&probe_id),
                        "system",
                        format!("probe {probe_id} session closed"),
                    );
                    state.bus.publish(Event::for_probe("probe.disconnected", &probe_id));
                }
            }
        }
    });
}

/// Periodically transition stale probes to offline. Emits `probe.offline`
/// once per crossing; the registry keeps the prior-status knowledge.
pub fn spawn_offline_detector(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(state.config.offline_sweep_interval());
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }
            let crossed = state.fleet.mark_offline(state.config.degraded_window()).await;
            for probe_id in crossed {
                state.audit.record(
                    AuditEvent::new(
                        "probe.offline",
                        "system",
                        format!("probe {probe_id} went offline"),
                    )
                    .probe(&probe_id),
                );
                state.bus.publish(Event::for_probe("probe.offline", &probe_id));
            }
        }
    });
}

/// Delete expired web sessions on a fixed interval.
fn spawn_session_reaper(state: Arc<AppState>) {
    let Some(sessions) = state.sessions.clone() else {
        return;
    };
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(state.config.session_reaper_interval());
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }
            let reaped = sessions.reap_expired();
            if reaped > 0 {
                tracing::debug!(reaped, "expired web sessions deleted");
            }
        }
    });
}

/// Drop tracker entries past their deadline so abandoned waits cannot leak.
fn spawn_tracker_sweeper(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(std::time::Duration::from_secs(30));
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }
            let expired = state.tracker.sweep_expired();
            if !expired.is_empty() {
                tracing::debug!(expired = expired.len(), "stale pending commands swept");
            }
        }
    });
}
