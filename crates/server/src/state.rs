// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared server state.
//!
//! Every subsystem is constructed once at startup and wired here; nothing
//! holds a back-reference to the state, so the dependency graph stays a DAG
//! (hub -> tracker edges go through callbacks configured below).

use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

use legator_protocol::{decode_signing_key, generate_signing_key, Signer};

use crate::approval::{ApprovalDispatcher, ApprovalQueue, ApprovalRequest};
use crate::audit::AuditStore;
use crate::auth::apikeys::{ApiKeyStore, RateLimiter};
use crate::auth::sessions::SessionStore;
use crate::auth::users::UserStore;
use crate::config::ServerConfig;
use crate::dispatch::{DispatchPolicy, Dispatcher};
use crate::events::EventBus;
use crate::fleet::FleetRegistry;
use crate::hub::router::MessageRouter;
use crate::hub::{FleetAuthenticator, Hub, ProbeAuthenticator, SessionTransition};
use crate::policy::PolicyStore;
use crate::tracker::CommandTracker;
use crate::webhook::{NoopSink, WebhookSink, WebhookStore};

/// Server version, baked in at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct AppState {
    pub config: ServerConfig,
    pub fleet: Arc<FleetRegistry>,
    pub hub: Arc<Hub>,
    pub tracker: Arc<CommandTracker>,
    pub dispatcher: Arc<Dispatcher>,
    pub approvals: Arc<ApprovalQueue>,
    pub audit: Arc<AuditStore>,
    pub bus: Arc<EventBus>,
    pub policies: Arc<PolicyStore>,
    pub api_keys: Option<Arc<ApiKeyStore>>,
    pub users: Option<Arc<UserStore>>,
    pub sessions: Option<Arc<SessionStore>>,
    pub rate_limiter: Arc<RateLimiter>,
    pub router: Arc<MessageRouter>,
    pub probe_auth: Arc<dyn ProbeAuthenticator>,
    pub webhooks: Arc<WebhookStore>,
    pub webhook_sink: Arc<dyn WebhookSink>,
    pub shutdown: CancellationToken,
    /// Lifecycle transition drain, taken once by the startup task.
    lifecycle_rx: std::sync::Mutex<Option<tokio::sync::mpsc::UnboundedReceiver<SessionTransition>>>,
}

impl AppState {
    /// Build the full state from disk-backed stores.
    pub fn build(config: ServerConfig) -> anyhow::Result<Arc<Self>> {
        let dir = config.data_dir.clone();
        let fleet = Arc::new(FleetRegistry::open(
            &dir,
            config.active_window(),
            config.degraded_window(),
        )?);
        let audit = Arc::new(AuditStore::open(&dir, config.audit_ring_capacity)?);
        let policies = Arc::new(PolicyStore::open(&dir)?);
        let api_keys = Some(Arc::new(ApiKeyStore::open(&dir)?));
        let users = Some(Arc::new(UserStore::open(&dir)?));
        let sessions = Some(Arc::new(SessionStore::open(&dir)?));

        if let Some(ref users) = users {
            if let Some(password) = users.bootstrap_admin()? {
                tracing::warn!("bootstrap admin created: username=admin password={password} (change it)");
            }
        }

        let webhooks = Arc::new(WebhookStore::open(&dir)?);
        let signer = resolve_signer(&config)?;
        Ok(Self::assemble(
            config, fleet, audit, policies, api_keys, users, sessions, webhooks, None, signer,
        ))
    }

    /// Wire subsystems together. Shared by the disk build and test fixtures.
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        config: ServerConfig,
        fleet: Arc<FleetRegistry>,
        audit: Arc<AuditStore>,
        policies: Arc<PolicyStore>,
        api_keys: Option<Arc<ApiKeyStore>>,
        users: Option<Arc<UserStore>>,
        sessions: Option<Arc<SessionStore>>,
        webhooks: Arc<WebhookStore>,
        webhook_sink: Option<Arc<dyn WebhookSink>>,
        signer: Option<Signer>,
    ) -> Arc<Self> {
        let bus = Arc::new(EventBus::new());
        let tracker = Arc::new(CommandTracker::new(config.tracker_deadline()));
        let (hub, lifecycle_rx) = Hub::new(signer);
        let dispatcher =
            Dispatcher::new(Arc::clone(&hub), Arc::clone(&tracker), Arc::clone(&audit), Arc::clone(&bus));
        let approvals = ApprovalQueue::new(
            config.approval_ttl(),
            config.approval_queue_max,
            Arc::clone(&audit),
            Arc::clone(&bus),
        );
        approvals.set_dispatcher(approval_dispatcher(Arc::clone(&dispatcher)));

        let router = Arc::new(MessageRouter::new(
            Arc::clone(&fleet),
            Arc::clone(&tracker),
            hub.streams(),
            Arc::clone(&audit),
            Arc::clone(&bus),
        ));
        let rate_limiter =
            Arc::new(RateLimiter::new(config.rate_limit_per_min, Duration::from_secs(60)));
        let probe_auth: Arc<dyn ProbeAuthenticator> = FleetAuthenticator::new(Arc::clone(&fleet));
        let webhook_sink = webhook_sink.unwrap_or_else(|| Arc::new(NoopSink));

        Arc::new(Self {
            config,
            fleet,
            hub,
            tracker,
            dispatcher,
            approvals,
            audit,
            bus,
            policies,
            api_keys,
            users,
            sessions,
            rate_limiter,
            router,
            probe_auth,
            webhooks,
            webhook_sink,
            shutdown: CancellationToken::new(),
            lifecycle_rx: std::sync::Mutex::new(Some(lifecycle_rx)),
        })
    }

    /// Whether any credential channel is configured. When false, permission
    /// gates pass through (bootstrap and embedded-test deployments).
    pub fn auth_configured(&self) -> bool {
        self.api_keys.is_some() || self.sessions.is_some()
    }

    /// Take the hub lifecycle receiver. Yields `Some` exactly once.
    pub fn take_lifecycle_rx(
        &self,
    ) -> Option<tokio::sync::mpsc::UnboundedReceiver<SessionTransition>> {
        self.lifecycle_rx.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Dispatch-on-approval edge: fire-and-forget send of the approved command.
fn approval_dispatcher(dispatcher: Arc<Dispatcher>) -> ApprovalDispatcher {
    Arc::new(move |request: ApprovalRequest| {
        let dispatcher = Arc::clone(&dispatcher);
        async move {
            let actor = request.decided_by.clone().unwrap_or_else(|| "system".to_owned());
            let outcome = dispatcher
                .dispatch_with_policy(
                    &CancellationToken::new(),
                    &request.probe_id,
                    request.command.clone(),
                    request.policy_level_at_submit,
                    DispatchPolicy::DispatchOnly,
                    &actor,
                )
                .await;
            match outcome.err {
                None => Ok(()),
                Some(e) => Err(e.to_string()),
            }
        }
        .boxed()
    })
}

/// Resolve the envelope signing key: config flag (or `LEGATOR_SIGNING_KEY`
/// env via clap) wins; otherwise a key is generated and printed once.
fn resolve_signer(config: &ServerConfig) -> anyhow::Result<Option<Signer>> {
    let hex_key = match config.signing_key {
        Some(ref k) => k.clone(),
        None => {
            let generated = generate_signing_key()?;
            tracing::warn!(
                "no signing key configured; generated one for this run: LEGATOR_SIGNING_KEY={generated}"
            );
            generated
        }
    };
    let key = decode_signing_key(&hex_key)?;
    Ok(Some(Signer::new(&key)?))
}
