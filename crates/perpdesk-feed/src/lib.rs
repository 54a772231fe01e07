//! Inbound processing for perpdesk.
//!
//! Provides:
//! - `ExchangeDecoder` / `GatewayDecoder`: frames to `InboundEvent`s
//! - `MessageRouter`: exhaustive dispatch to an `EventHandler`
//! - `StateMirrors`: price series, positions, orders, balance
//! - `StateSync`: the handler that keeps the mirrors in step
//! - `Refresher`: authoritative re-queries through `ExchangeApi`

pub mod decoder;
pub mod error;
pub mod event;
pub mod mirror;
pub mod refresh;
pub mod router;
pub mod sync;

pub use decoder::{Decoded, ExchangeDecoder, FrameDecoder, GatewayDecoder};
pub use error::{FeedError, FeedResult};
pub use event::{
    AccountUpdate, InboundEvent, OrderUpdate, PriceTick, StreamError, StreamErrorKind,
};
pub use mirror::{
    BalanceMirror, OrdersMirror, PositionsMirror, PriceSeriesMirror, StateMirrors,
    PRICE_SERIES_CAPACITY,
};
pub use refresh::{
    refresh_channel, Panel, RefreshHandle, RefreshObserver, RefreshOutcome, RefreshQueue,
    RefreshScope, Refresher,
};
pub use router::{EventHandler, MessageRouter, RouterStats};
pub use sync::{link_notice, EventSink, StateSync};
