//! Collaborator seams for account queries and order entry.
//!
//! The sync core only ever calls the three getters (as refresh
//! primitives). Placement and cancellation pass through the gateway.

use crate::error::RestResult;
use futures_util::future::BoxFuture;
use perpdesk_core::{AccountBalance, Order, OrderAck, OrderId, OrderRequest, Position};

/// Account and order operations against an authoritative source.
pub trait ExchangeApi: Send + Sync {
    fn place_order<'a>(&'a self, request: &'a OrderRequest) -> BoxFuture<'a, RestResult<OrderAck>>;

    fn cancel_order<'a>(
        &'a self,
        order_id: OrderId,
        symbol: &'a str,
    ) -> BoxFuture<'a, RestResult<OrderAck>>;

    fn get_balance(&self) -> BoxFuture<'_, RestResult<AccountBalance>>;

    /// Every position the account reports, flat ones included.
    fn get_positions(&self) -> BoxFuture<'_, RestResult<Vec<Position>>>;

    fn get_open_orders(&self) -> BoxFuture<'_, RestResult<Vec<Order>>>;
}

/// Listen-key management for the user-data stream.
pub trait UserStreamApi: Send + Sync {
    fn create_listen_key(&self) -> BoxFuture<'_, RestResult<String>>;

    fn keepalive_listen_key(&self) -> BoxFuture<'_, RestResult<()>>;
}
