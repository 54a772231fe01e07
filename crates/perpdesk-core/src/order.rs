//! Order-related types and identifiers.
//!
//! Enum spellings follow the exchange wire format (`BUY`, `LIMIT`,
//! `PARTIALLY_FILLED`) so the same types serve exchange payloads and
//! the gateway's own REST responses.

use crate::decimal::{Price, Size};
use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    /// Stop-limit: triggers at `stop_price`, rests at `price`.
    #[serde(alias = "STOP_LIMIT")]
    Stop,
    StopMarket,
    TakeProfit,
    TakeProfitMarket,
    TrailingStopMarket,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "MARKET",
            Self::Limit => "LIMIT",
            Self::Stop => "STOP",
            Self::StopMarket => "STOP_MARKET",
            Self::TakeProfit => "TAKE_PROFIT",
            Self::TakeProfitMarket => "TAKE_PROFIT_MARKET",
            Self::TrailingStopMarket => "TRAILING_STOP_MARKET",
        }
    }

    /// Whether orders of this type rest on the book at a limit price.
    pub fn requires_price(&self) -> bool {
        matches!(self, Self::Limit | Self::Stop | Self::TakeProfit)
    }

    pub fn requires_stop_price(&self) -> bool {
        matches!(
            self,
            Self::Stop | Self::StopMarket | Self::TakeProfit | Self::TakeProfitMarket
        )
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time-in-force for resting orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    #[default]
    Gtc,
    Ioc,
    Fok,
    /// Post-only.
    Gtx,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gtc => write!(f, "GTC"),
            Self::Ioc => write!(f, "IOC"),
            Self::Fok => write!(f, "FOK"),
            Self::Gtx => write!(f, "GTX"),
        }
    }
}

/// Order status as reported by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Expired,
    Rejected,
    /// Expired by self-trade prevention; terminal like `Expired`.
    ExpiredInMatch,
}

impl OrderStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::New | Self::PartiallyFilled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "NEW",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Filled => "FILLED",
            Self::Canceled => "CANCELED",
            Self::Expired => "EXPIRED",
            Self::Rejected => "REJECTED",
            Self::ExpiredInMatch => "EXPIRED_IN_MATCH",
        };
        f.write_str(s)
    }
}

/// Exchange-assigned order id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client order ID for idempotent submission.
///
/// Format: `pd_{timestamp_ms}_{uuid_short}`, within the exchange's
/// 36-character limit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientOrderId(String);

impl ClientOrderId {
    pub fn new() -> Self {
        let ts = chrono::Utc::now().timestamp_millis();
        let uuid_short = &Uuid::new_v4().simple().to_string()[..8];
        Self(format!("pd_{ts}_{uuid_short}"))
    }

    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ClientOrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An open (or recently closed) order as mirrored locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    #[serde(default)]
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Size,
    #[serde(default = "default_executed")]
    pub executed_qty: Size,
    /// `None` for market-style orders.
    #[serde(default)]
    pub price: Option<Price>,
    #[serde(default)]
    pub stop_price: Option<Price>,
    pub status: OrderStatus,
    pub update_time_ms: i64,
}

fn default_executed() -> Size {
    Size::ZERO
}

impl Order {
    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Order placement request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Size,
    #[serde(default)]
    pub price: Option<Price>,
    #[serde(default)]
    pub stop_price: Option<Price>,
    #[serde(default)]
    pub time_in_force: Option<TimeInForce>,
    #[serde(default)]
    pub reduce_only: bool,
    #[serde(default)]
    pub client_order_id: Option<ClientOrderId>,
}

impl OrderRequest {
    pub fn market(symbol: &str, side: OrderSide, quantity: Size) -> Self {
        Self {
            symbol: crate::normalize_symbol(symbol),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            stop_price: None,
            time_in_force: None,
            reduce_only: false,
            client_order_id: None,
        }
    }

    pub fn limit(symbol: &str, side: OrderSide, quantity: Size, price: Price) -> Self {
        Self {
            order_type: OrderType::Limit,
            price: Some(price),
            time_in_force: Some(TimeInForce::Gtc),
            ..Self::market(symbol, side, quantity)
        }
    }

    /// Check the parameters the exchange would otherwise reject.
    pub fn validate(&self) -> Result<()> {
        if self.symbol.is_empty() {
            return Err(CoreError::InvalidOrder("symbol is required".to_string()));
        }
        if !self.quantity.is_positive() {
            return Err(CoreError::InvalidSize(format!(
                "quantity must be positive, got {}",
                self.quantity
            )));
        }
        if self.order_type.requires_price() {
            match self.price {
                Some(p) if p.is_positive() => {}
                _ => {
                    return Err(CoreError::InvalidPrice(format!(
                        "{} orders require a positive price",
                        self.order_type
                    )))
                }
            }
        }
        if self.order_type.requires_stop_price() {
            match self.stop_price {
                Some(p) if p.is_positive() => {}
                _ => {
                    return Err(CoreError::InvalidPrice(format!(
                        "{} orders require a positive stop price",
                        self.order_type
                    )))
                }
            }
        }
        Ok(())
    }
}

/// Exchange acknowledgement of a placement or cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: OrderId,
    pub symbol: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub client_order_id: Option<String>,
}
