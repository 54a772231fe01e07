//! Subscriptions: declarative stream intents replayed after every reconnect.

use crate::error::{WsError, WsResult};
use crate::message::{ClientCommand, ExchangeRequest};
use parking_lot::RwLock;
use perpdesk_core::normalize_symbol;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Kline interval used when a subscription names none.
pub const DEFAULT_KLINE_INTERVAL: &str = "1m";

/// Stream kinds shared by the exchange feed and the browser protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    MiniTicker,
    Ticker,
    Kline,
    Depth,
    UserData,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MiniTicker => "mini_ticker",
            Self::Ticker => "ticker",
            Self::Kline => "kline",
            Self::Depth => "depth",
            Self::UserData => "user_data",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A (kind, symbol?, interval?) stream intent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Subscription {
    pub kind: StreamKind,
    /// `None` means every symbol (mini tickers) or not applicable (user data).
    pub symbol: Option<String>,
    /// Only meaningful for klines.
    pub interval: Option<String>,
}

impl Subscription {
    /// Build a normalized subscription: upper-case symbol, kline interval
    /// defaulted, irrelevant fields dropped.
    pub fn new(kind: StreamKind, symbol: Option<&str>, interval: Option<&str>) -> Self {
        let symbol = match kind {
            StreamKind::UserData => None,
            _ => symbol.map(normalize_symbol).filter(|s| !s.is_empty()),
        };
        let interval = match kind {
            StreamKind::Kline => Some(
                interval
                    .filter(|i| !i.is_empty())
                    .unwrap_or(DEFAULT_KLINE_INTERVAL)
                    .to_string(),
            ),
            _ => None,
        };
        Self {
            kind,
            symbol,
            interval,
        }
    }

    pub fn mini_ticker_all() -> Self {
        Self::new(StreamKind::MiniTicker, None, None)
    }

    pub fn mini_ticker(symbol: &str) -> Self {
        Self::new(StreamKind::MiniTicker, Some(symbol), None)
    }

    pub fn ticker(symbol: &str) -> Self {
        Self::new(StreamKind::Ticker, Some(symbol), None)
    }

    pub fn kline(symbol: &str, interval: &str) -> Self {
        Self::new(StreamKind::Kline, Some(symbol), Some(interval))
    }

    pub fn depth(symbol: &str) -> Self {
        Self::new(StreamKind::Depth, Some(symbol), None)
    }

    pub fn user_data() -> Self {
        Self::new(StreamKind::UserData, None, None)
    }

    /// Exchange stream name, `None` for streams carried by their own
    /// endpoint (user data) or lacking a required symbol.
    pub fn stream_name(&self) -> Option<String> {
        let symbol = self.symbol.as_deref().map(str::to_ascii_lowercase);
        match (self.kind, symbol) {
            (StreamKind::MiniTicker, None) => Some("!miniTicker@arr".to_string()),
            (StreamKind::MiniTicker, Some(s)) => Some(format!("{s}@miniTicker")),
            (StreamKind::Ticker, Some(s)) => Some(format!("{s}@ticker")),
            (StreamKind::Kline, Some(s)) => Some(format!(
                "{s}@kline_{}",
                self.interval.as_deref().unwrap_or(DEFAULT_KLINE_INTERVAL)
            )),
            (StreamKind::Depth, Some(s)) => Some(format!("{s}@depth")),
            _ => None,
        }
    }

    /// Whether an event of this stream is covered by the subscription.
    pub fn admits(&self, kind: StreamKind, symbol: Option<&str>, interval: Option<&str>) -> bool {
        if self.kind != kind {
            return false;
        }
        let symbol_ok = match (&self.symbol, symbol) {
            (None, _) => true,
            (Some(mine), Some(theirs)) => mine.eq_ignore_ascii_case(theirs),
            (Some(_), None) => false,
        };
        let interval_ok = match (&self.interval, interval) {
            (Some(mine), Some(theirs)) => mine == theirs,
            _ => true,
        };
        symbol_ok && interval_ok
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(symbol) = &self.symbol {
            write!(f, ":{symbol}")?;
        }
        if let Some(interval) = &self.interval {
            write!(f, ":{interval}")?;
        }
        Ok(())
    }
}

/// Recorded subscription set for one connection role.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    subscriptions: RwLock<BTreeSet<Subscription>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subscription. Returns false if it was already present.
    pub fn add(&self, sub: Subscription) -> bool {
        self.subscriptions.write().insert(sub)
    }

    /// Forget a subscription. Returns false if it was absent.
    pub fn remove(&self, sub: &Subscription) -> bool {
        self.subscriptions.write().remove(sub)
    }

    pub fn contains(&self, sub: &Subscription) -> bool {
        self.subscriptions.read().contains(sub)
    }

    /// Point-in-time copy in a stable order.
    pub fn snapshot(&self) -> Vec<Subscription> {
        self.subscriptions.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.read().is_empty()
    }
}

/// Turns subscriptions into outbound frames for one protocol.
pub trait SubscriptionCodec: Send + Sync {
    fn subscribe_frames(&self, subs: &[Subscription]) -> WsResult<Vec<String>>;
    fn unsubscribe_frames(&self, subs: &[Subscription]) -> WsResult<Vec<String>>;
}

/// Exchange protocol: one batched `SUBSCRIBE` request with a fresh id.
#[derive(Debug)]
pub struct ExchangeSubscribeCodec {
    next_id: AtomicU64,
}

impl ExchangeSubscribeCodec {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    fn frames(
        &self,
        subs: &[Subscription],
        build: fn(Vec<String>, u64) -> ExchangeRequest,
    ) -> WsResult<Vec<String>> {
        let params: Vec<String> = subs.iter().filter_map(Subscription::stream_name).collect();
        if params.is_empty() {
            return Ok(Vec::new());
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(vec![serde_json::to_string(&build(params, id))?])
    }
}

impl Default for ExchangeSubscribeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionCodec for ExchangeSubscribeCodec {
    fn subscribe_frames(&self, subs: &[Subscription]) -> WsResult<Vec<String>> {
        self.frames(subs, ExchangeRequest::subscribe)
    }

    fn unsubscribe_frames(&self, subs: &[Subscription]) -> WsResult<Vec<String>> {
        self.frames(subs, ExchangeRequest::unsubscribe)
    }
}

/// Browser protocol: one `{action, type, symbol, interval}` frame each.
#[derive(Debug, Default, Clone, Copy)]
pub struct GatewaySubscribeCodec;

impl SubscriptionCodec for GatewaySubscribeCodec {
    fn subscribe_frames(&self, subs: &[Subscription]) -> WsResult<Vec<String>> {
        subs.iter()
            .map(|s| serde_json::to_string(&ClientCommand::subscribe(s)).map_err(WsError::from))
            .collect()
    }

    fn unsubscribe_frames(&self, subs: &[Subscription]) -> WsResult<Vec<String>> {
        subs.iter()
            .map(|s| serde_json::to_string(&ClientCommand::unsubscribe(s)).map_err(WsError::from))
            .collect()
    }
}
