//! JSON bodies of the gateway's REST endpoints.
//!
//! Shared by the gateway server (which produces them) and
//! [`GatewayApiClient`](crate::GatewayApiClient) (which consumes them).

use perpdesk_core::{AccountBalance, Order, OrderAck, Position};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceEnvelope {
    pub balance: AccountBalance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionsEnvelope {
    pub positions: Vec<Position>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrdersEnvelope {
    pub orders: Vec<Order>,
}

/// Reply to a placement or cancellation: `status` is `"success"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEnvelope {
    pub status: String,
    pub order: OrderAck,
}

impl OrderEnvelope {
    pub fn success(order: OrderAck) -> Self {
        Self {
            status: "success".to_string(),
            order,
        }
    }
}

/// Reply to a stream reset: the role and the state it was in when asked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamResetEnvelope {
    pub role: String,
    pub state: String,
}

/// Error body of any failed gateway request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub detail: String,
}

/// `DELETE /api/orders/{order_id}` query string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelQuery {
    pub symbol: String,
}
