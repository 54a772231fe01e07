use parking_lot::RwLock;
use perpdesk_core::Order;

/// Open orders, replaced wholesale from the authoritative list.
///
/// Order pushes never patch this mirror: partial fills and cancels race
/// each other on the wire, so only a full re-query is trusted.
#[derive(Debug, Default)]
pub struct OrdersMirror {
    orders: RwLock<Vec<Order>>,
}

impl OrdersMirror {
    pub(crate) fn replace_all(&self, orders: Vec<Order>) {
        *self.orders.write() = orders;
    }

    pub fn snapshot(&self) -> Vec<Order> {
        self.orders.read().clone()
    }

    pub fn len(&self) -> usize {
        self.orders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.read().is_empty()
    }
}
