//! Shared state behind every gateway handler.

use crate::broadcast::Broadcaster;
use crate::config::GatewayConfig;
use crate::session::ConnectionLimiter;
use perpdesk_feed::{RefreshHandle, Refresher, StateMirrors};
use perpdesk_rest::ExchangeApi;
use perpdesk_ws::{ConnectionRole, SupervisorHandle, Subscription};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Account access, present only when exchange credentials are configured.
pub struct ExchangeAccess {
    pub api: Arc<dyn ExchangeApi>,
    pub refresher: Arc<Refresher>,
    pub refresh: RefreshHandle,
}

#[derive(Clone)]
pub struct GatewayState {
    pub(crate) config: Arc<GatewayConfig>,
    pub(crate) broadcaster: Arc<Broadcaster>,
    pub(crate) mirrors: Arc<StateMirrors>,
    pub(crate) exchange: Option<Arc<ExchangeAccess>>,
    pub(crate) market: Option<SupervisorHandle>,
    pub(crate) user: Option<SupervisorHandle>,
    /// Held while a session changes its filter and the market feed's
    /// subscriptions, so a release never races another session's acquire.
    pub(crate) upstream_lock: Arc<Mutex<()>>,
    /// Subscriptions the market feed carries regardless of sessions.
    pub(crate) pinned: Arc<BTreeSet<Subscription>>,
    pub(crate) limiter: Arc<ConnectionLimiter>,
    pub(crate) shutdown: CancellationToken,
}

impl GatewayState {
    pub fn new(
        config: GatewayConfig,
        broadcaster: Arc<Broadcaster>,
        mirrors: Arc<StateMirrors>,
    ) -> Self {
        Self {
            limiter: Arc::new(ConnectionLimiter::new(config.max_connections)),
            config: Arc::new(config),
            broadcaster,
            mirrors,
            exchange: None,
            market: None,
            user: None,
            upstream_lock: Arc::new(Mutex::new(())),
            pinned: Arc::new(BTreeSet::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_exchange(mut self, access: ExchangeAccess) -> Self {
        self.exchange = Some(Arc::new(access));
        self
    }

    /// Attach the market feed. Whatever it is already subscribed to stays
    /// subscribed when sessions come and go.
    pub fn with_market(mut self, market: SupervisorHandle) -> Self {
        self.pinned = Arc::new(market.subscriptions().into_iter().collect());
        self.market = Some(market);
        self
    }

    pub fn with_user_stream(mut self, user: SupervisorHandle) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_shutdown(mut self, parent: &CancellationToken) -> Self {
        self.shutdown = parent.child_token();
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn mirrors(&self) -> &Arc<StateMirrors> {
        &self.mirrors
    }

    /// Supervisor owning the upstream link for `role`, if one is attached.
    pub fn upstream(&self, role: ConnectionRole) -> Option<&SupervisorHandle> {
        match role {
            ConnectionRole::MarketFeed => self.market.as_ref(),
            ConnectionRole::UserData => self.user.as_ref(),
            ConnectionRole::BrowserSession => None,
        }
    }

    pub fn has_exchange(&self) -> bool {
        self.exchange.is_some()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn active_sessions(&self) -> usize {
        self.limiter.current_count()
    }
}
