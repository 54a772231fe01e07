use parking_lot::RwLock;
use perpdesk_core::PricePoint;
use std::collections::{HashMap, VecDeque};

/// Points kept per symbol.
pub const PRICE_SERIES_CAPACITY: usize = 50;

/// Bounded per-symbol price series; the oldest point goes first.
#[derive(Debug)]
pub struct PriceSeriesMirror {
    capacity: usize,
    series: RwLock<HashMap<String, VecDeque<PricePoint>>>,
}

impl PriceSeriesMirror {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: RwLock::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn append(&self, point: PricePoint) {
        let mut series = self.series.write();
        let points = series
            .entry(point.symbol.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));
        if points.len() == self.capacity {
            points.pop_front();
        }
        points.push_back(point);
    }

    /// Oldest first.
    pub fn snapshot(&self, symbol: &str) -> Vec<PricePoint> {
        self.series
            .read()
            .get(symbol)
            .map(|points| points.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn latest(&self, symbol: &str) -> Option<PricePoint> {
        self.series
            .read()
            .get(symbol)
            .and_then(|points| points.back().cloned())
    }

    pub fn len(&self, symbol: &str) -> usize {
        self.series.read().get(symbol).map_or(0, VecDeque::len)
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.series.read().keys().cloned().collect();
        symbols.sort();
        symbols
    }
}

impl Default for PriceSeriesMirror {
    fn default() -> Self {
        Self::with_capacity(PRICE_SERIES_CAPACITY)
    }
}
