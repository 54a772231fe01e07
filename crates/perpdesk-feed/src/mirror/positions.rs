use parking_lot::RwLock;
use perpdesk_core::Position;
use std::collections::BTreeMap;

/// Positions keyed by symbol.
///
/// Flat (zero quantity) reports stay in the map so the symbol is still
/// known, but [`open_positions`](Self::open_positions) leaves them out.
/// They go away only when a full refresh no longer reports them.
#[derive(Debug, Default)]
pub struct PositionsMirror {
    positions: RwLock<BTreeMap<String, Position>>,
}

impl PositionsMirror {
    pub(crate) fn upsert(&self, position: Position) {
        self.positions
            .write()
            .insert(position.symbol.clone(), position);
    }

    pub(crate) fn replace_all(&self, positions: Vec<Position>) {
        let fresh: BTreeMap<String, Position> = positions
            .into_iter()
            .map(|p| (p.symbol.clone(), p))
            .collect();
        *self.positions.write() = fresh;
    }

    /// Non-flat positions ordered by symbol.
    pub fn open_positions(&self) -> Vec<Position> {
        self.positions
            .read()
            .values()
            .filter(|p| p.is_open())
            .cloned()
            .collect()
    }

    /// Every known position, flat ones included.
    pub fn all(&self) -> Vec<Position> {
        self.positions.read().values().cloned().collect()
    }

    pub fn get(&self, symbol: &str) -> Option<Position> {
        self.positions.read().get(symbol).cloned()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.positions.read().contains_key(symbol)
    }
}
