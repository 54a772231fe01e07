//! Local state mirrors.
//!
//! Readers get point-in-time copies. Writes happen only inside this
//! crate (the sync handlers and the refresher), each under one write
//! lock, so no reader sees a half-applied update.

mod balance;
mod orders;
mod positions;
mod prices;

pub use balance::BalanceMirror;
pub use orders::OrdersMirror;
pub use positions::PositionsMirror;
pub use prices::{PriceSeriesMirror, PRICE_SERIES_CAPACITY};

/// Every mirror one process keeps.
#[derive(Debug, Default)]
pub struct StateMirrors {
    pub prices: PriceSeriesMirror,
    pub positions: PositionsMirror,
    pub orders: OrdersMirror,
    pub balance: BalanceMirror,
}

impl StateMirrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mirrors keeping `capacity` price points per symbol.
    pub fn with_price_capacity(capacity: usize) -> Self {
        Self {
            prices: PriceSeriesMirror::with_capacity(capacity),
            ..Self::default()
        }
    }
}
