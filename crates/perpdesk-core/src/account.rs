//! Account state: positions and balances.

use crate::decimal::{Price, Size};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a non-flat position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

/// A position report for one symbol.
///
/// A zero quantity is still a report: the exchange keeps flat symbols in
/// its position list, so the record is kept and only hidden from open views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    /// Signed quantity; negative is short.
    pub quantity: Size,
    pub entry_price: Price,
    pub unrealized_pnl: Decimal,
    #[serde(default)]
    pub mark_price: Option<Price>,
    #[serde(default)]
    pub update_time_ms: i64,
}

impl Position {
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            quantity: Size::ZERO,
            entry_price: Price::ZERO,
            unrealized_pnl: Decimal::ZERO,
            mark_price: None,
            update_time_ms: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        !self.quantity.is_zero()
    }

    pub fn side(&self) -> Option<PositionSide> {
        if self.quantity.is_positive() {
            Some(PositionSide::Long)
        } else if self.quantity.is_negative() {
            Some(PositionSide::Short)
        } else {
            None
        }
    }
}

/// Balance of a single margin asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    pub wallet_balance: Decimal,
    pub available_balance: Decimal,
    pub unrealized_pnl: Decimal,
}

/// Account-level balance summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub total_wallet_balance: Decimal,
    pub available_balance: Decimal,
    pub total_unrealized_pnl: Decimal,
    #[serde(default)]
    pub assets: Vec<AssetBalance>,
}
