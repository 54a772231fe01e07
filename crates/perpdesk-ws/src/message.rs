//! Wire message types.
//!
//! Two protocols live here:
//! - exchange control requests (`SUBSCRIBE` / `UNSUBSCRIBE`)
//! - the browser protocol: server-to-client [`GatewayMessage`] tagged by
//!   `type`, client-to-server [`ClientCommand`] tagged by `action`

use crate::connection::ConnectionRole;
use crate::subscription::{StreamKind, Subscription};
use perpdesk_core::{DepthUpdate, Kline, MiniTicker, Ticker};
use serde::{Deserialize, Serialize};

/// Exchange stream control request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRequest {
    pub method: String,
    pub params: Vec<String>,
    pub id: u64,
}

impl ExchangeRequest {
    pub fn subscribe(params: Vec<String>, id: u64) -> Self {
        Self {
            method: "SUBSCRIBE".to_string(),
            params,
            id,
        }
    }

    pub fn unsubscribe(params: Vec<String>, id: u64) -> Self {
        Self {
            method: "UNSUBSCRIBE".to_string(),
            params,
            id,
        }
    }
}

/// Browser-to-gateway control message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientCommand {
    Subscribe {
        #[serde(rename = "type")]
        kind: StreamKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        symbol: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        interval: Option<String>,
    },
    Unsubscribe {
        #[serde(rename = "type")]
        kind: StreamKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        symbol: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        interval: Option<String>,
    },
    Ping {
        #[serde(default)]
        timestamp: Option<i64>,
    },
}

impl ClientCommand {
    pub fn subscribe(sub: &Subscription) -> Self {
        Self::Subscribe {
            kind: sub.kind,
            symbol: sub.symbol.clone(),
            interval: sub.interval.clone(),
        }
    }

    pub fn unsubscribe(sub: &Subscription) -> Self {
        Self::Unsubscribe {
            kind: sub.kind,
            symbol: sub.symbol.clone(),
            interval: sub.interval.clone(),
        }
    }

    pub fn ping(timestamp: i64) -> Self {
        Self::Ping {
            timestamp: Some(timestamp),
        }
    }

    /// Normalized subscription named by a subscribe/unsubscribe command.
    pub fn subscription(&self) -> Option<Subscription> {
        match self {
            Self::Subscribe {
                kind,
                symbol,
                interval,
            }
            | Self::Unsubscribe {
                kind,
                symbol,
                interval,
            } => Some(Subscription::new(
                *kind,
                symbol.as_deref(),
                interval.as_deref(),
            )),
            Self::Ping { .. } => None,
        }
    }
}

/// Link status carried by `connection` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Connected,
    Connecting,
    Reconnecting,
    Disconnected,
    /// Retries exhausted; needs a manual retry.
    GaveUp,
}

/// Payload of a `connection` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionNotice {
    pub status: LinkStatus,
    pub timestamp: i64,
    /// Upstream link the notice is about; absent for the browser's own socket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ConnectionRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_in_ms: Option<u64>,
}

impl ConnectionNotice {
    pub fn new(status: LinkStatus, timestamp: i64) -> Self {
        Self {
            status,
            timestamp,
            role: None,
            attempt: None,
            retry_in_ms: None,
        }
    }
}

/// Payload of an `error` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub message: String,
    /// UI panel the error belongs to (`orders`, `positions`, `balance`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panel: Option<String>,
}

/// Payload of a `user_data` message: the raw exchange event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDataPayload {
    pub event_type: String,
    pub event_time: i64,
    pub data: serde_json::Value,
}

/// Gateway-to-browser message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayMessage {
    MiniTicker(MiniTicker),
    Ticker(Ticker),
    Kline(Kline),
    Depth(DepthUpdate),
    UserData(UserDataPayload),
    Error(ErrorNotice),
    Pong { timestamp: i64 },
    Connection(ConnectionNotice),
}

impl GatewayMessage {
    /// Every `type` tag the browser protocol defines.
    pub const KINDS: [&'static str; 8] = [
        "mini_ticker",
        "user_data",
        "ticker",
        "kline",
        "depth",
        "error",
        "pong",
        "connection",
    ];

    pub fn kind(&self) -> &'static str {
        match self {
            Self::MiniTicker(_) => "mini_ticker",
            Self::Ticker(_) => "ticker",
            Self::Kline(_) => "kline",
            Self::Depth(_) => "depth",
            Self::UserData(_) => "user_data",
            Self::Error(_) => "error",
            Self::Pong { .. } => "pong",
            Self::Connection(_) => "connection",
        }
    }

    pub fn error(message: impl Into<String>, panel: Option<&str>) -> Self {
        Self::Error(ErrorNotice {
            message: message.into(),
            panel: panel.map(str::to_string),
        })
    }

    /// Stream the message belongs to, for per-session filtering.
    /// `None` for control messages every session receives.
    pub fn stream(&self) -> Option<(StreamKind, Option<&str>, Option<&str>)> {
        match self {
            Self::MiniTicker(t) => Some((StreamKind::MiniTicker, Some(&t.symbol), None)),
            Self::Ticker(t) => Some((StreamKind::Ticker, Some(&t.symbol), None)),
            Self::Kline(k) => Some((StreamKind::Kline, Some(&k.symbol), Some(&k.interval))),
            Self::Depth(d) => Some((StreamKind::Depth, Some(&d.symbol), None)),
            Self::UserData(_) => Some((StreamKind::UserData, None, None)),
            Self::Error(_) | Self::Pong { .. } | Self::Connection(_) => None,
        }
    }
}
