//! Browser trade sockets.
//!
//! One task per socket: it drains the session's broadcast queue, pings
//! the browser on the heartbeat period and applies the client's
//! subscribe/unsubscribe/ping commands.

use crate::broadcast::{SessionFilter, SessionRegistration};
use crate::state::GatewayState;
use axum::body::Bytes;
use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use parking_lot::RwLock;
use perpdesk_core::now_ms;
use perpdesk_ws::{
    ClientCommand, ConnectionNotice, GatewayMessage, HeartbeatMonitor, HeartbeatVerdict,
    LinkStatus, StreamKind, Subscription,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Caps concurrent trade sockets.
pub struct ConnectionLimiter {
    current: AtomicUsize,
    max: usize,
}

impl ConnectionLimiter {
    pub fn new(max: usize) -> Self {
        Self {
            current: AtomicUsize::new(0),
            max,
        }
    }

    /// Take a slot. The permit releases it on drop and can move into the
    /// socket task, so the slot is held for the socket's whole life.
    pub fn try_acquire(self: &Arc<Self>) -> Option<ConnectionPermit> {
        loop {
            let current = self.current.load(Ordering::Acquire);
            if current >= self.max {
                return None;
            }
            if self
                .current
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(ConnectionPermit {
                    limiter: Arc::clone(self),
                });
            }
        }
    }

    pub fn current_count(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }
}

pub struct ConnectionPermit {
    limiter: Arc<ConnectionLimiter>,
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.limiter.current.fetch_sub(1, Ordering::Release);
    }
}

pub(crate) async fn ws_handler(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> Response {
    let Some(permit) = state.limiter.try_acquire() else {
        warn!(
            current = state.limiter.current_count(),
            max = state.config.max_connections,
            "Trade socket limit reached"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    };

    ws.on_upgrade(move |socket| run_session(socket, state, permit))
}

type SocketSink = SplitSink<WebSocket, Message>;

async fn send_message(sender: &mut SocketSink, message: &GatewayMessage) -> Result<(), axum::Error> {
    match serde_json::to_string(message) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(e) => {
            warn!(error = %e, kind = message.kind(), "Failed to serialize message");
            Ok(())
        }
    }
}

async fn run_session(socket: WebSocket, state: GatewayState, _permit: ConnectionPermit) {
    let SessionRegistration {
        id,
        mut rx,
        filter,
        evicted,
    } = state.broadcaster.register();
    info!(session_id = id, sessions = state.limiter.current_count(), "Trade socket opened");

    let (mut sender, mut receiver) = socket.split();
    let heartbeat = HeartbeatMonitor::new(
        state.config.heartbeat_interval(),
        state.config.heartbeat_max_missed,
    );
    let mut ticker = heartbeat.ticker();

    let greeting = GatewayMessage::Connection(ConnectionNotice::new(LinkStatus::Connected, now_ms()));
    let mut open = send_message(&mut sender, &greeting).await.is_ok();

    while open {
        tokio::select! {
            biased;

            _ = state.shutdown.cancelled() => {
                let _ = sender.send(Message::Close(Some(CloseFrame {
                    code: close_code::AWAY,
                    reason: Utf8Bytes::from_static("server shutting down"),
                }))).await;
                open = false;
            }
            _ = evicted.cancelled() => {
                let _ = sender.send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: Utf8Bytes::from_static("slow consumer"),
                }))).await;
                open = false;
            }
            queued = rx.recv() => match queued {
                Some(text) => {
                    open = sender.send(Message::Text(text.to_string().into())).await.is_ok();
                }
                None => open = false,
            },
            _ = ticker.tick() => match heartbeat.on_tick() {
                HeartbeatVerdict::SendPing => {
                    open = sender.send(Message::Ping(Bytes::new())).await.is_ok();
                }
                HeartbeatVerdict::Dead { missed } => {
                    warn!(session_id = id, missed, "Browser stopped answering pings");
                    open = false;
                }
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = handle_command(&state, id, &filter, text.as_str()).await {
                        open = send_message(&mut sender, &reply).await.is_ok();
                    }
                }
                Some(Ok(Message::Pong(_))) => heartbeat.record_pong(),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Binary(_))) => {}
                Some(Ok(Message::Close(_))) | None => open = false,
                Some(Err(e)) => {
                    debug!(session_id = id, error = %e, "Trade socket receive error");
                    open = false;
                }
            },
        }
    }

    state.broadcaster.unregister(id);
    let held = filter.read().subscriptions();
    let _upstream = state.upstream_lock.lock().await;
    for sub in held {
        release_upstream(&state, id, &sub).await;
    }
    info!(session_id = id, "Trade socket closed");
}

/// Apply one client command. Returns the reply to send, if any.
async fn handle_command(
    state: &GatewayState,
    session_id: u64,
    filter: &Arc<RwLock<SessionFilter>>,
    text: &str,
) -> Option<GatewayMessage> {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => {
            debug!(session_id, error = %e, "Invalid client command");
            return Some(GatewayMessage::error(format!("Invalid command: {e}"), None));
        }
    };

    let (sub, subscribing) = match &command {
        ClientCommand::Ping { timestamp } => {
            return Some(GatewayMessage::Pong {
                timestamp: timestamp.unwrap_or_else(now_ms),
            })
        }
        ClientCommand::Subscribe { .. } => (command.subscription()?, true),
        ClientCommand::Unsubscribe { .. } => (command.subscription()?, false),
    };

    if requires_symbol(sub.kind) && sub.symbol.is_none() {
        return Some(GatewayMessage::error(
            format!("{} subscription requires a symbol", sub.kind),
            None,
        ));
    }

    // Filter edits and the upstream change happen under one lock, so a
    // release never checks "held elsewhere" between another session's
    // filter insert and its upstream subscribe.
    let _upstream = state.upstream_lock.lock().await;
    if subscribing {
        let added = filter.write().insert(sub.clone());
        if added {
            debug!(session_id, subscription = %sub, "Session subscribed");
            acquire_upstream(state, sub).await;
        }
    } else {
        let removed = filter.write().remove(&sub);
        if removed {
            debug!(session_id, subscription = %sub, "Session unsubscribed");
            release_upstream(state, session_id, &sub).await;
        }
    }
    None
}

fn requires_symbol(kind: StreamKind) -> bool {
    matches!(kind, StreamKind::Ticker | StreamKind::Kline | StreamKind::Depth)
}

/// Make sure the market feed carries `sub`.
async fn acquire_upstream(state: &GatewayState, sub: Subscription) {
    let Some(market) = &state.market else {
        return;
    };
    if sub.kind == StreamKind::UserData {
        return;
    }
    if let Err(e) = market.subscribe(sub.clone()).await {
        // Still recorded; it goes out with the next replay.
        warn!(subscription = %sub, error = %e, "Upstream subscribe failed");
    }
}

/// Withdraw `sub` from the market feed unless it is pinned or another
/// session still holds it.
async fn release_upstream(state: &GatewayState, session_id: u64, sub: &Subscription) {
    let Some(market) = &state.market else {
        return;
    };
    if sub.kind == StreamKind::UserData
        || state.pinned.contains(sub)
        || state.broadcaster.is_held_elsewhere(sub, session_id)
    {
        return;
    }
    if let Err(e) = market.unsubscribe(sub).await {
        warn!(subscription = %sub, error = %e, "Upstream unsubscribe failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Broadcaster;
    use crate::config::GatewayConfig;
    use perpdesk_feed::StateMirrors;
    use perpdesk_ws::{
        ConnectionRole, ExchangeSubscribeCodec, ReconnectSupervisor, SupervisorConfig,
        TungsteniteConnector,
    };

    const SUBSCRIBE: &str = r#"{"action":"subscribe","type":"ticker","symbol":"btcusdt"}"#;
    const UNSUBSCRIBE: &str = r#"{"action":"unsubscribe","type":"ticker","symbol":"btcusdt"}"#;

    #[test]
    fn test_limiter_caps_and_releases() {
        let limiter = Arc::new(ConnectionLimiter::new(2));
        let first = limiter.try_acquire().unwrap();
        let _second = limiter.try_acquire().unwrap();
        assert!(limiter.try_acquire().is_none());
        assert_eq!(limiter.current_count(), 2);

        drop(first);
        assert_eq!(limiter.current_count(), 1);
        assert!(limiter.try_acquire().is_some());
    }

    #[test]
    fn test_symbol_requirements() {
        assert!(requires_symbol(StreamKind::Kline));
        assert!(requires_symbol(StreamKind::Depth));
        assert!(!requires_symbol(StreamKind::MiniTicker));
        assert!(!requires_symbol(StreamKind::UserData));
    }

    #[tokio::test]
    async fn test_release_and_acquire_do_not_interleave() {
        // Never run: subscribe and unsubscribe only touch the registry while closed.
        let market = ReconnectSupervisor::new(
            ConnectionRole::MarketFeed,
            SupervisorConfig::default(),
            TungsteniteConnector::new("ws://127.0.0.1:9", ConnectionRole::MarketFeed),
            Arc::new(ExchangeSubscribeCodec::new()),
        );
        let state = GatewayState::new(
            GatewayConfig::default(),
            Arc::new(Broadcaster::new(16)),
            Arc::new(StateMirrors::new()),
        )
        .with_market(market.handle());
        let ticker = serde_json::from_str::<ClientCommand>(SUBSCRIBE)
            .unwrap()
            .subscription()
            .unwrap();

        let leaving = state.broadcaster.register();
        let joining = state.broadcaster.register();
        let (leaving_id, joining_id) = (leaving.id, joining.id);
        assert!(handle_command(&state, leaving_id, &leaving.filter, SUBSCRIBE)
            .await
            .is_none());
        assert_eq!(market.handle().subscriptions(), vec![ticker.clone()]);

        // Queue the release first, then the acquire, behind a held lock.
        let gate = state.upstream_lock.lock().await;
        let release = tokio::spawn({
            let (state, filter) = (state.clone(), leaving.filter.clone());
            async move { handle_command(&state, leaving_id, &filter, UNSUBSCRIBE).await }
        });
        tokio::task::yield_now().await;
        let acquire = tokio::spawn({
            let (state, filter) = (state.clone(), joining.filter.clone());
            async move { handle_command(&state, joining_id, &filter, SUBSCRIBE).await }
        });
        tokio::task::yield_now().await;
        assert!(!joining.filter.read().contains(&ticker));
        assert!(leaving.filter.read().contains(&ticker));

        drop(gate);
        release.await.unwrap();
        acquire.await.unwrap();

        assert!(joining.filter.read().contains(&ticker));
        assert!(!leaving.filter.read().contains(&ticker));
        assert_eq!(market.handle().subscriptions(), vec![ticker]);
    }
}
