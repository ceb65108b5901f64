// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the legator control plane.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "legatord", about = "legator control plane for probe fleets")]
pub struct ServerConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "LEGATOR_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9440, env = "LEGATOR_PORT")]
    pub port: u16,

    /// Directory holding the per-subsystem databases.
    #[arg(long, default_value = "./data", env = "LEGATOR_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Envelope signing key (hex, >= 64 chars). Auto-generated if unset.
    #[arg(long, env = "LEGATOR_SIGNING_KEY", hide_env_values = true)]
    pub signing_key: Option<String>,

    /// Heartbeat window in seconds within which a probe counts as online.
    #[arg(long, default_value_t = 120, env = "LEGATOR_ACTIVE_WINDOW_SECS")]
    pub active_window_secs: u64,

    /// Heartbeat window in seconds within which a probe counts as degraded.
    #[arg(long, default_value_t = 600, env = "LEGATOR_DEGRADED_WINDOW_SECS")]
    pub degraded_window_secs: u64,

    /// Offline-detector sweep interval in seconds.
    #[arg(long, default_value_t = 30, env = "LEGATOR_OFFLINE_SWEEP_SECS")]
    pub offline_sweep_secs: u64,

    /// Default command wait timeout in seconds when the request sets none.
    #[arg(long, default_value_t = 35, env = "LEGATOR_COMMAND_WAIT_SECS")]
    pub command_wait_secs: u64,

    /// Tracker deadline in seconds for pending commands.
    #[arg(long, default_value_t = 120, env = "LEGATOR_TRACKER_DEADLINE_SECS")]
    pub tracker_deadline_secs: u64,

    /// Approval time-to-live in seconds.
    #[arg(long, default_value_t = 900, env = "LEGATOR_APPROVAL_TTL_SECS")]
    pub approval_ttl_secs: u64,

    /// Approval reaper interval in seconds.
    #[arg(long, default_value_t = 30, env = "LEGATOR_APPROVAL_REAPER_SECS")]
    pub approval_reaper_secs: u64,

    /// Session expiry reaper interval in seconds.
    #[arg(long, default_value_t = 900, env = "LEGATOR_SESSION_REAPER_SECS")]
    pub session_reaper_secs: u64,

    /// In-memory audit ring capacity.
    #[arg(long, default_value_t = 1000, env = "LEGATOR_AUDIT_RING_CAPACITY")]
    pub audit_ring_capacity: usize,

    /// Per-API-key rate limit in requests per minute. Zero disables.
    #[arg(long, default_value_t = 120, env = "LEGATOR_RATE_LIMIT_PER_MIN")]
    pub rate_limit_per_min: u32,

    /// Registration token time-to-live in seconds.
    #[arg(long, default_value_t = 86_400, env = "LEGATOR_TOKEN_TTL_SECS")]
    pub token_ttl_secs: u64,

    /// Maximum pending approvals held in the queue.
    #[arg(long, default_value_t = 500, env = "LEGATOR_APPROVAL_QUEUE_MAX")]
    pub approval_queue_max: usize,
}

impl ServerConfig {
    pub fn active_window(&self) -> Duration {
        Duration::from_secs(self.active_window_secs)
    }

    pub fn degraded_window(&self) -> Duration {
        Duration::from_secs(self.degraded_window_secs)
    }

    pub fn offline_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.offline_sweep_secs)
    }

    pub fn command_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.command_wait_secs)
    }

    pub fn tracker_deadline(&self) -> Duration {
        Duration::from_secs(self.tracker_deadline_secs)
    }

    pub fn approval_ttl(&self) -> Duration {
        Duration::from_secs(self.approval_ttl_secs)
    }

    pub fn approval_reaper_interval(&self) -> Duration {
        Duration::from_secs(self.approval_reaper_secs)
    }

    pub fn session_reaper_interval(&self) -> Duration {
        Duration::from_secs(self.session_reaper_secs)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}
