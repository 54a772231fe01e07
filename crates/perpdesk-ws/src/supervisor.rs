//! Reconnection supervisor.
//!
//! Owns at most one [`StreamConnection`] at a time and drives the state
//! machine `Idle -> Connecting -> Open -> Backoff -> Connecting -> ...`,
//! ending in `GaveUp` after `max_attempts` consecutive failures.
//!
//! - Backoff delay is `base_delay * 2^attempt` (2, 4, 8, 16 s by default).
//! - A successful open clears the attempt counter.
//! - Every open replays the full recorded subscription set.
//! - The only timer is the backoff sleep inside the run loop, so it can never
//!   fire against a connection that has since been replaced.

use crate::connection::{
    ConnectionEvent, ConnectionHandle, ConnectionRole, Connector, StreamConnection, WsOutbound,
};
use crate::error::{WsError, WsResult};
use crate::heartbeat::{HeartbeatMonitor, HeartbeatVerdict};
use crate::message::ClientCommand;
use crate::subscription::{Subscription, SubscriptionCodec, SubscriptionRegistry};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How liveness probes are expressed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PingStyle {
    /// WebSocket ping frames, answered by pong frames.
    #[default]
    Transport,
    /// `{"action":"ping","timestamp":..}` answered by a `pong` message.
    Json,
}

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Consecutive failures before giving up.
    pub max_attempts: u32,
    /// Backoff unit.
    pub base_delay: Duration,
    pub heartbeat_interval: Duration,
    /// Consecutive unanswered pings before the connection is declared dead.
    pub heartbeat_max_missed: u32,
    pub ping_style: PingStyle,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_max_missed: 2,
            ping_style: PingStyle::Transport,
        }
    }
}

/// Backoff before retry number `attempt` (1-based).
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

/// Supervisor state, published on a watch channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Connecting,
    Open,
    Backoff { attempt: u32, delay: Duration },
    GaveUp { attempts: u32 },
}

impl SupervisorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Backoff { .. } => "backoff",
            Self::GaveUp { .. } => "gave_up",
        }
    }
}

/// What a frame handler made of an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Handled,
    /// Malformed or unroutable; logged and dropped.
    Dropped,
    /// Answer to our JSON ping.
    HeartbeatReply,
    /// The stream is no longer usable (e.g. an expired listen key).
    Reconnect,
}

/// Consumer of a supervised connection's frames and state changes.
///
/// Called from the supervisor task, one frame at a time, in arrival order.
pub trait FrameHandler: Send + Sync {
    fn on_frame(&self, role: ConnectionRole, frame: &str) -> Disposition;

    fn on_state(&self, role: ConnectionRole, state: &SupervisorState) {
        let _ = (role, state);
    }

    /// A connect attempt failed or an open connection was lost.
    fn on_link_lost(&self, role: ConnectionRole, reason: &WsError) {
        let _ = (role, reason);
    }
}

#[derive(Debug)]
enum Command {
    Reset,
}

enum Ended {
    Shutdown,
    Lost(WsError),
}

/// Cloneable control surface of a running supervisor.
#[derive(Clone)]
pub struct SupervisorHandle {
    role: ConnectionRole,
    subscriptions: Arc<SubscriptionRegistry>,
    codec: Arc<dyn SubscriptionCodec>,
    current: Arc<RwLock<Option<ConnectionHandle>>>,
    state_rx: watch::Receiver<SupervisorState>,
    command_tx: mpsc::Sender<Command>,
    shutdown: CancellationToken,
}

impl SupervisorHandle {
    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    pub fn state(&self) -> SupervisorState {
        self.state_rx.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<SupervisorState> {
        self.state_rx.clone()
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.snapshot()
    }

    fn open_connection(&self) -> Option<ConnectionHandle> {
        self.current.read().as_ref().filter(|c| c.is_open()).cloned()
    }

    /// Record a subscription and, if connected, send it right away.
    ///
    /// Returns false if it was already recorded.
    pub async fn subscribe(&self, sub: Subscription) -> WsResult<bool> {
        if !self.subscriptions.add(sub.clone()) {
            return Ok(false);
        }
        debug!(role = %self.role, subscription = %sub, "Subscription recorded");
        if let Some(conn) = self.open_connection() {
            for frame in self.codec.subscribe_frames(std::slice::from_ref(&sub))? {
                conn.send_text(frame).await?;
            }
        }
        Ok(true)
    }

    /// Forget a subscription and, if connected, withdraw it.
    pub async fn unsubscribe(&self, sub: &Subscription) -> WsResult<bool> {
        if !self.subscriptions.remove(sub) {
            return Ok(false);
        }
        debug!(role = %self.role, subscription = %sub, "Subscription removed");
        if let Some(conn) = self.open_connection() {
            for frame in self.codec.unsubscribe_frames(std::slice::from_ref(sub))? {
                conn.send_text(frame).await?;
            }
        }
        Ok(true)
    }

    /// Send on the current connection.
    pub async fn send_text(&self, text: impl Into<String>) -> WsResult<()> {
        let conn = self.open_connection().ok_or_else(|| {
            WsError::NotConnected(format!("{} supervisor has no open connection", self.role))
        })?;
        conn.send_text(text).await
    }

    /// Manual retry: clears the attempt counter and reconnects.
    ///
    /// Takes effect from `GaveUp` or `Backoff`; ignored while open.
    pub fn reset(&self) {
        if self.command_tx.try_send(Command::Reset).is_err() {
            debug!(role = %self.role, "Reset already pending");
        }
    }

    pub fn shutdown(&self) {
        info!(role = %self.role, "Supervisor shutdown requested");
        self.shutdown.cancel();
    }
}

/// Reconnection supervisor for one connection role.
pub struct ReconnectSupervisor<C> {
    role: ConnectionRole,
    config: SupervisorConfig,
    connector: C,
    subscriptions: Arc<SubscriptionRegistry>,
    codec: Arc<dyn SubscriptionCodec>,
    heartbeat: HeartbeatMonitor,
    current: Arc<RwLock<Option<ConnectionHandle>>>,
    state_tx: watch::Sender<SupervisorState>,
    state_rx: watch::Receiver<SupervisorState>,
    command_tx: mpsc::Sender<Command>,
    command_rx: mpsc::Receiver<Command>,
    shutdown: CancellationToken,
}

impl<C: Connector> ReconnectSupervisor<C> {
    pub fn new(
        role: ConnectionRole,
        config: SupervisorConfig,
        connector: C,
        codec: Arc<dyn SubscriptionCodec>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(SupervisorState::Idle);
        let (command_tx, command_rx) = mpsc::channel(4);
        let heartbeat = HeartbeatMonitor::new(config.heartbeat_interval, config.heartbeat_max_missed);
        Self {
            role,
            config,
            connector,
            subscriptions: Arc::new(SubscriptionRegistry::new()),
            codec,
            heartbeat,
            current: Arc::new(RwLock::new(None)),
            state_tx,
            state_rx,
            command_tx,
            command_rx,
            shutdown: CancellationToken::new(),
        }
    }

    /// Pre-record subscriptions to issue on the first open.
    pub fn with_subscriptions(self, subs: impl IntoIterator<Item = Subscription>) -> Self {
        for sub in subs {
            self.subscriptions.add(sub);
        }
        self
    }

    /// Tie this supervisor's lifetime to a parent token.
    pub fn with_shutdown(mut self, parent: &CancellationToken) -> Self {
        self.shutdown = parent.child_token();
        self
    }

    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            role: self.role,
            subscriptions: self.subscriptions.clone(),
            codec: self.codec.clone(),
            current: self.current.clone(),
            state_rx: self.state_rx.clone(),
            command_tx: self.command_tx.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    fn transition(&self, handler: &Arc<dyn FrameHandler>, state: SupervisorState) {
        debug!(role = %self.role, ?state, "Supervisor state");
        self.state_tx.send_replace(state.clone());
        handler.on_state(self.role, &state);
    }

    /// Run until shutdown.
    pub async fn run(mut self, handler: Arc<dyn FrameHandler>) {
        let shutdown = self.shutdown.clone();
        let mut attempt = 0u32;

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            self.transition(&handler, SupervisorState::Connecting);
            let connected = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                result = self.connector.connect() => result,
            };

            match connected {
                Ok(conn) => {
                    attempt = 0;
                    match self.drive(conn, &handler, &shutdown).await {
                        Ended::Shutdown => break,
                        Ended::Lost(reason) => {
                            warn!(role = %self.role, %reason, "Connection lost");
                            handler.on_link_lost(self.role, &reason);
                        }
                    }
                }
                Err(e) => {
                    warn!(role = %self.role, error = %e, "Connect attempt failed");
                    handler.on_link_lost(self.role, &e);
                }
            }

            attempt += 1;
            if attempt >= self.config.max_attempts {
                error!(
                    role = %self.role,
                    attempts = attempt,
                    "Max reconnection attempts reached, giving up"
                );
                self.transition(&handler, SupervisorState::GaveUp { attempts: attempt });

                let reset = tokio::select! {
                    biased;
                    () = shutdown.cancelled() => false,
                    command = self.command_rx.recv() => command.is_some(),
                };
                if !reset {
                    break;
                }
                info!(role = %self.role, "Manual reset after give-up");
                attempt = 0;
                self.transition(&handler, SupervisorState::Idle);
                continue;
            }

            let delay = backoff_delay(self.config.base_delay, attempt);
            warn!(role = %self.role, attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");
            self.transition(&handler, SupervisorState::Backoff { attempt, delay });

            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                Some(Command::Reset) = self.command_rx.recv() => {
                    info!(role = %self.role, "Manual reset during backoff");
                    attempt = 0;
                    self.transition(&handler, SupervisorState::Idle);
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        info!(role = %self.role, "Supervisor stopped");
        self.transition(&handler, SupervisorState::Idle);
    }

    async fn drive(
        &mut self,
        conn: StreamConnection,
        handler: &Arc<dyn FrameHandler>,
        shutdown: &CancellationToken,
    ) -> Ended {
        let StreamConnection { handle, mut events } = conn;
        *self.current.write() = Some(handle.clone());
        info!(
            role = %self.role,
            connection_id = handle.id(),
            endpoint = %handle.endpoint(),
            "Connection open"
        );
        self.transition(handler, SupervisorState::Open);

        let ended = match self.replay_subscriptions(&handle).await {
            Ok(()) => {
                self.heartbeat.reset();
                self.pump(&handle, &mut events, handler, shutdown).await
            }
            Err(e) => Ended::Lost(e),
        };

        *self.current.write() = None;
        handle.close();
        ended
    }

    async fn replay_subscriptions(&self, handle: &ConnectionHandle) -> WsResult<()> {
        let subs = self.subscriptions.snapshot();
        for frame in self.codec.subscribe_frames(&subs)? {
            handle.send_text(frame).await?;
        }
        info!(role = %self.role, subscriptions = subs.len(), "Subscriptions replayed");
        Ok(())
    }

    async fn pump(
        &mut self,
        handle: &ConnectionHandle,
        events: &mut mpsc::Receiver<ConnectionEvent>,
        handler: &Arc<dyn FrameHandler>,
        shutdown: &CancellationToken,
    ) -> Ended {
        let mut ticker = self.heartbeat.ticker();

        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => return Ended::Shutdown,

                _ = ticker.tick() => {
                    match self.heartbeat.on_tick() {
                        HeartbeatVerdict::SendPing => {
                            if let Err(e) = self.send_ping(handle).await {
                                return Ended::Lost(e);
                            }
                        }
                        HeartbeatVerdict::Dead { missed } => {
                            warn!(role = %self.role, missed, "Heartbeat timeout");
                            return Ended::Lost(WsError::HeartbeatTimeout { missed });
                        }
                    }
                }

                event = events.recv() => {
                    match event {
                        Some(ConnectionEvent::Message(text)) => {
                            match handler.on_frame(self.role, &text) {
                                Disposition::HeartbeatReply => self.heartbeat.record_pong(),
                                Disposition::Reconnect => {
                                    return Ended::Lost(WsError::ReconnectRequested(
                                        "handler rejected stream".to_string(),
                                    ));
                                }
                                Disposition::Handled | Disposition::Dropped => {}
                            }
                        }
                        Some(ConnectionEvent::Pong) => self.heartbeat.record_pong(),
                        Some(ConnectionEvent::Closed { code, reason }) => {
                            return Ended::Lost(WsError::ConnectionClosed { code, reason });
                        }
                        Some(ConnectionEvent::Errored(e)) => {
                            return Ended::Lost(WsError::ConnectionErrored(e));
                        }
                        None => {
                            return Ended::Lost(WsError::ConnectionClosed {
                                code: 1006,
                                reason: "event channel closed".to_string(),
                            });
                        }
                    }
                }

                Some(command) = self.command_rx.recv() => {
                    debug!(role = %self.role, ?command, "Ignoring command while open");
                }
            }
        }
    }

    async fn send_ping(&self, handle: &ConnectionHandle) -> WsResult<()> {
        match self.config.ping_style {
            PingStyle::Transport => handle.send(WsOutbound::Ping).await,
            PingStyle::Json => {
                let ping = ClientCommand::ping(perpdesk_core::now_ms());
                handle.send_text(serde_json::to_string(&ping)?).await
            }
        }
    }
}
