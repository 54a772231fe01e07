//! Decoded inbound events.
//!
//! Every frame from any connection decodes into zero or more
//! [`InboundEvent`]s. The set is closed: adding a kind means adding a
//! variant here, a decoder mapping and one handler method.

use perpdesk_core::{DepthUpdate, Kline, MiniTicker, Order, Position, Price, PricePoint, Ticker};
use perpdesk_ws::{ConnectionNotice, UserDataPayload};
use serde_json::Value;

/// A price update from either ticker stream.
#[derive(Debug, Clone, PartialEq)]
pub enum PriceTick {
    Mini(MiniTicker),
    Full(Ticker),
}

impl PriceTick {
    pub fn symbol(&self) -> &str {
        match self {
            Self::Mini(t) => &t.symbol,
            Self::Full(t) => &t.symbol,
        }
    }

    pub fn price(&self) -> Price {
        match self {
            Self::Mini(t) => t.price,
            Self::Full(t) => t.price,
        }
    }

    pub fn event_time(&self) -> i64 {
        match self {
            Self::Mini(t) => t.event_time,
            Self::Full(t) => t.event_time,
        }
    }

    /// The chart point this tick contributes.
    pub fn point(&self) -> PricePoint {
        PricePoint {
            symbol: self.symbol().to_string(),
            price: self.price(),
            timestamp: self.event_time(),
        }
    }
}

/// `ACCOUNT_UPDATE`: balance and position changes pushed by the exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountUpdate {
    pub event_time: i64,
    /// Why the account changed (`ORDER`, `FUNDING_FEE`, ...).
    pub reason: Option<String>,
    /// Only the positions that changed; flat ones arrive with zero quantity.
    pub positions: Vec<Position>,
    pub raw: Value,
}

/// `ORDER_TRADE_UPDATE`: one order's state change.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderUpdate {
    pub event_time: i64,
    pub order: Order,
    /// `NEW`, `TRADE`, `CANCELED`, `EXPIRED`, ...
    pub execution_type: String,
    pub raw: Value,
}

impl AccountUpdate {
    pub fn payload(&self) -> UserDataPayload {
        UserDataPayload {
            event_type: "ACCOUNT_UPDATE".to_string(),
            event_time: self.event_time,
            data: self.raw.clone(),
        }
    }
}

impl OrderUpdate {
    pub fn payload(&self) -> UserDataPayload {
        UserDataPayload {
            event_type: "ORDER_TRADE_UPDATE".to_string(),
            event_time: self.event_time,
            data: self.raw.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorKind {
    /// The user-data listen key expired; the stream must be reopened.
    ListenKeyExpired,
    /// Error reply from the exchange stream API.
    Exchange,
    /// `error` message from the gateway.
    Gateway,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamError {
    pub kind: StreamErrorKind,
    pub code: Option<i64>,
    pub message: String,
    pub panel: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    PriceTick(PriceTick),
    Kline(Kline),
    Depth(DepthUpdate),
    AccountUpdate(AccountUpdate),
    OrderUpdate(OrderUpdate),
    HeartbeatReply { timestamp: i64 },
    Error(StreamError),
    ConnectionStatus(ConnectionNotice),
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PriceTick(PriceTick::Mini(_)) => "mini_ticker",
            Self::PriceTick(PriceTick::Full(_)) => "ticker",
            Self::Kline(_) => "kline",
            Self::Depth(_) => "depth",
            Self::AccountUpdate(_) => "account_update",
            Self::OrderUpdate(_) => "order_update",
            Self::HeartbeatReply { .. } => "pong",
            Self::Error(_) => "error",
            Self::ConnectionStatus(_) => "connection",
        }
    }
}
