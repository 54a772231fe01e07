//! Supervised WebSocket connections.
//!
//! Provides:
//! - `StreamConnection`: one transport session with an explicit lifecycle
//!   and a single event channel
//! - `ReconnectSupervisor`: exponential backoff (2, 4, 8, 16 s), give-up
//!   after 5 consecutive failures, subscription replay on every open
//! - `HeartbeatMonitor`: 30s ping, two missed pongs close the connection
//! - Wire types for exchange requests and the browser protocol

pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod subscription;
pub mod supervisor;

pub use connection::{
    open, pair, ConnectionEvent, ConnectionHandle, ConnectionRole, Connector, LifecycleState,
    StreamConnection, TransportEnd, TungsteniteConnector, WsOutbound,
};
pub use error::{WsError, WsResult};
pub use heartbeat::{HeartbeatMonitor, HeartbeatStats, HeartbeatVerdict};
pub use message::{
    ClientCommand, ConnectionNotice, ErrorNotice, ExchangeRequest, GatewayMessage, LinkStatus,
    UserDataPayload,
};
pub use subscription::{
    ExchangeSubscribeCodec, GatewaySubscribeCodec, StreamKind, Subscription, SubscriptionCodec,
    SubscriptionRegistry,
};
pub use supervisor::{
    backoff_delay, Disposition, FrameHandler, PingStyle, ReconnectSupervisor, SupervisorConfig,
    SupervisorHandle, SupervisorState,
};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
