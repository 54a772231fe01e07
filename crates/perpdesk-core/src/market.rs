//! Market data payloads.
//!
//! Field names match the gateway's browser wire format; timestamps are
//! epoch milliseconds. `event_time` is the exchange's event time and
//! `timestamp` the local receive time.

use crate::decimal::{Price, Size};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One point of a per-symbol price series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub symbol: String,
    pub price: Price,
    pub timestamp: i64,
}

/// Rolling 24h mini ticker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiniTicker {
    pub symbol: String,
    /// Last (close) price.
    pub price: Price,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub volume: Size,
    pub quote_volume: Decimal,
    pub timestamp: i64,
    pub event_time: i64,
}

/// Full 24h ticker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub price: Price,
    pub price_change: Decimal,
    pub price_change_percent: Decimal,
    pub high: Price,
    pub low: Price,
    pub volume: Size,
    pub quote_volume: Decimal,
    pub timestamp: i64,
    pub event_time: i64,
}

/// Candlestick update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kline {
    pub symbol: String,
    pub interval: String,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Size,
    pub is_closed: bool,
    pub event_time: i64,
    pub start_time: i64,
    pub end_time: i64,
}

/// One order book level, serialized as `[price, quantity]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthLevel(pub Price, pub Size);

/// Order book delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthUpdate {
    pub symbol: String,
    pub event_time: i64,
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_level_is_pair() {
        let level: DepthLevel = serde_json::from_str(r#"["64000.5","1.250"]"#).unwrap();
        assert_eq!(level.0.to_string(), "64000.5");
        assert_eq!(level.1.to_string(), "1.250");
    }
}
