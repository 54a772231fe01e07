//! Core domain types for perpdesk.
//!
//! This crate provides the types shared by every other crate:
//! - `Price`, `Size`: precision-safe numeric types
//! - `Order`, `OrderRequest`, `OrderStatus`: order lifecycle
//! - `Position`, `AccountBalance`: account state
//! - `MiniTicker`, `Ticker`, `Kline`, `DepthUpdate`, `PricePoint`: market data

pub mod account;
pub mod decimal;
pub mod error;
pub mod market;
pub mod order;

pub use account::{AccountBalance, AssetBalance, Position, PositionSide};
pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use market::{DepthLevel, DepthUpdate, Kline, MiniTicker, PricePoint, Ticker};
pub use order::{
    ClientOrderId, Order, OrderAck, OrderId, OrderRequest, OrderSide, OrderStatus, OrderType,
    TimeInForce,
};

/// Normalize a trading symbol to the exchange's canonical upper-case form.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
