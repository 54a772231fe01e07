//! Stream connection: one transport session with an explicit lifecycle.
//!
//! A connection is split in two halves created together by [`pair`]:
//! - [`StreamConnection`] is what consumers see: a cloneable
//!   [`ConnectionHandle`] for sending and closing, plus the receiving end
//!   of the event channel (message, pong, close, error).
//! - [`TransportEnd`] is held by whatever drives the socket (the tungstenite
//!   task, or a test). It delivers inbound frames, drains outbound ones and
//!   emits exactly one terminal event.
//!
//! Connections are never reused: a reconnect builds a new pair.

use crate::error::{WsError, WsResult};
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const OUTBOUND_CAPACITY: usize = 256;
const EVENT_CAPACITY: usize = 1024;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Which peer a connection talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionRole {
    /// Exchange public market streams.
    MarketFeed,
    /// Exchange authenticated user-data stream.
    UserData,
    /// A browser peer (gateway side) or the gateway itself (client side).
    BrowserSession,
}

impl ConnectionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MarketFeed => "market_feed",
            Self::UserData => "user_data",
            Self::BrowserSession => "browser_session",
        }
    }
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a single transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Outbound frame queued for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsOutbound {
    Text(String),
    /// Transport-level ping frame.
    Ping,
}

/// Observable connection events, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Message(String),
    Pong,
    Closed { code: u16, reason: String },
    Errored(String),
}

impl ConnectionEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed { .. } | Self::Errored(_))
    }
}

struct Shared {
    id: u64,
    role: ConnectionRole,
    endpoint: String,
    state: RwLock<LifecycleState>,
    close_token: CancellationToken,
}

/// Cloneable handle for sending on and closing a connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<Shared>,
    outbound_tx: mpsc::Sender<WsOutbound>,
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.shared.id)
            .field("role", &self.shared.role)
            .field("endpoint", &self.shared.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

impl ConnectionHandle {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn role(&self) -> ConnectionRole {
        self.shared.role
    }

    pub fn endpoint(&self) -> &str {
        &self.shared.endpoint
    }

    pub fn state(&self) -> LifecycleState {
        *self.shared.state.read()
    }

    pub fn is_open(&self) -> bool {
        self.state() == LifecycleState::Open
    }

    /// Enqueue an outbound frame.
    ///
    /// Fails with `NotConnected` unless the session is `Open`.
    pub async fn send(&self, frame: WsOutbound) -> WsResult<()> {
        let state = self.state();
        if state != LifecycleState::Open {
            return Err(WsError::NotConnected(format!(
                "connection {} is {state:?}",
                self.shared.id
            )));
        }
        self.outbound_tx
            .send(frame)
            .await
            .map_err(|_| WsError::SendFailed("transport task has stopped".to_string()))
    }

    pub async fn send_text(&self, text: impl Into<String>) -> WsResult<()> {
        self.send(WsOutbound::Text(text.into())).await
    }

    /// Request a close. Calling this on a closing or closed handle is a no-op.
    pub fn close(&self) {
        {
            let mut state = self.shared.state.write();
            match *state {
                LifecycleState::Closing | LifecycleState::Closed => return,
                LifecycleState::Connecting | LifecycleState::Open => {
                    *state = LifecycleState::Closing;
                }
            }
        }
        debug!(connection_id = self.shared.id, role = %self.shared.role, "Close requested");
        self.shared.close_token.cancel();
    }
}

/// Consumer half of a connection.
pub struct StreamConnection {
    pub handle: ConnectionHandle,
    pub events: mpsc::Receiver<ConnectionEvent>,
}

/// Transport half of a connection.
pub struct TransportEnd {
    shared: Arc<Shared>,
    outbound_rx: mpsc::Receiver<WsOutbound>,
    event_tx: mpsc::Sender<ConnectionEvent>,
    terminated: bool,
}

/// Create a connected pair in `Connecting` state.
pub fn pair(role: ConnectionRole, endpoint: impl Into<String>) -> (StreamConnection, TransportEnd) {
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let (event_tx, events) = mpsc::channel(EVENT_CAPACITY);
    let shared = Arc::new(Shared {
        id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
        role,
        endpoint: endpoint.into(),
        state: RwLock::new(LifecycleState::Connecting),
        close_token: CancellationToken::new(),
    });

    let connection = StreamConnection {
        handle: ConnectionHandle {
            shared: shared.clone(),
            outbound_tx,
        },
        events,
    };
    let end = TransportEnd {
        shared,
        outbound_rx,
        event_tx,
        terminated: false,
    };
    (connection, end)
}

impl TransportEnd {
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn state(&self) -> LifecycleState {
        *self.shared.state.read()
    }

    /// Mark the handshake complete.
    pub fn mark_open(&self) {
        let mut state = self.shared.state.write();
        if *state == LifecycleState::Connecting {
            *state = LifecycleState::Open;
        }
    }

    /// Token cancelled when the consumer asks to close.
    pub fn close_token(&self) -> CancellationToken {
        self.shared.close_token.clone()
    }

    pub fn is_close_requested(&self) -> bool {
        self.shared.close_token.is_cancelled()
    }

    /// Deliver an inbound text frame. Returns false if nobody is listening.
    pub async fn deliver(&self, text: String) -> bool {
        self.event_tx
            .send(ConnectionEvent::Message(text))
            .await
            .is_ok()
    }

    pub async fn deliver_pong(&self) -> bool {
        self.event_tx.send(ConnectionEvent::Pong).await.is_ok()
    }

    /// Next frame queued by the consumer; `None` once every handle is dropped.
    pub async fn next_outbound(&mut self) -> Option<WsOutbound> {
        self.outbound_rx.recv().await
    }

    /// Non-blocking variant of [`next_outbound`](Self::next_outbound).
    pub fn try_next_outbound(&mut self) -> Option<WsOutbound> {
        self.outbound_rx.try_recv().ok()
    }

    /// Emit the terminal event and mark the connection closed.
    ///
    /// Only the first terminal event is emitted; later calls return false.
    pub async fn finish(&mut self, event: ConnectionEvent) -> bool {
        if self.terminated || !event.is_terminal() {
            return false;
        }
        self.terminated = true;
        *self.shared.state.write() = LifecycleState::Closed;
        let _ = self.event_tx.send(event).await;
        true
    }
}

impl Drop for TransportEnd {
    fn drop(&mut self) {
        if self.terminated {
            return;
        }
        *self.shared.state.write() = LifecycleState::Closed;
        let _ = self.event_tx.try_send(ConnectionEvent::Closed {
            code: 1006,
            reason: "transport dropped".to_string(),
        });
    }
}

/// Source of fresh connections for a supervisor.
pub trait Connector: Send + Sync {
    /// Establish a new session. Each call yields a brand-new connection.
    fn connect(&self) -> BoxFuture<'_, WsResult<StreamConnection>>;
}

/// Open a WebSocket session to `url`.
pub async fn open(url: &str, role: ConnectionRole) -> WsResult<StreamConnection> {
    info!(url = %url, role = %role, "Connecting to WebSocket");

    let (ws_stream, _response) = connect_async_tls_with_config(url, None, true, None)
        .await
        .map_err(|e| WsError::ConnectionFailed(e.to_string()))?;

    let (connection, end) = pair(role, url);
    end.mark_open();
    info!(connection_id = end.id(), role = %role, "WebSocket connected");

    tokio::spawn(run_transport(ws_stream, end));
    Ok(connection)
}

/// Connector for a fixed WebSocket URL.
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    url: String,
    role: ConnectionRole,
}

impl TungsteniteConnector {
    pub fn new(url: impl Into<String>, role: ConnectionRole) -> Self {
        Self {
            url: url.into(),
            role,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for TungsteniteConnector {
    fn connect(&self) -> BoxFuture<'_, WsResult<StreamConnection>> {
        Box::pin(open(&self.url, self.role))
    }
}

async fn run_transport(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut end: TransportEnd,
) {
    let (mut write, mut read) = ws_stream.split();
    let close_token = end.close_token();
    let connection_id = end.id();

    let terminal = loop {
        tokio::select! {
            biased;

            () = close_token.cancelled() => {
                if let Err(e) = write.send(Message::Close(None)).await {
                    debug!(connection_id, ?e, "Close frame not sent");
                }
                break ConnectionEvent::Closed {
                    code: 1000,
                    reason: "closed locally".to_string(),
                };
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if !end.deliver(text).await {
                            debug!(connection_id, "Event receiver dropped");
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            break ConnectionEvent::Errored(e.to_string());
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        end.deliver_pong().await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (f.code.into(), f.reason.to_string()))
                            .unwrap_or((1000, "Normal close".to_string()));
                        warn!(connection_id, code, %reason, "WebSocket closed by peer");
                        break ConnectionEvent::Closed { code, reason };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(connection_id, error = %e, "WebSocket read error");
                        break ConnectionEvent::Errored(e.to_string());
                    }
                    None => {
                        break ConnectionEvent::Closed {
                            code: 1006,
                            reason: "stream ended".to_string(),
                        };
                    }
                }
            }

            outbound = end.next_outbound() => {
                let frame = match outbound {
                    Some(WsOutbound::Text(text)) => Message::Text(text),
                    Some(WsOutbound::Ping) => Message::Ping(Vec::new()),
                    None => {
                        let _ = write.send(Message::Close(None)).await;
                        break ConnectionEvent::Closed {
                            code: 1000,
                            reason: "all handles dropped".to_string(),
                        };
                    }
                };
                if let Err(e) = write.send(frame).await {
                    warn!(connection_id, error = %e, "WebSocket write error");
                    break ConnectionEvent::Errored(e.to_string());
                }
            }
        }
    };

    debug!(connection_id, ?terminal, "Transport finished");
    end.finish(terminal).await;
}
