//! Client for the gateway's own REST endpoints.
//!
//! Lets a remote peer (the watch client) use the same refresh
//! primitives the gateway uses against the exchange.

use crate::api::ExchangeApi;
use crate::binance::decode_response;
use crate::envelope::{
    BalanceEnvelope, CancelQuery, OrderEnvelope, OrdersEnvelope, PositionsEnvelope,
    StreamResetEnvelope,
};
use crate::error::{RestError, RestResult};
use futures_util::future::BoxFuture;
use perpdesk_core::{AccountBalance, Order, OrderAck, OrderId, OrderRequest, Position};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct GatewayApiClient {
    client: Client,
    base_url: String,
}

impl GatewayApiClient {
    /// `base_url` is the gateway origin, e.g. `http://127.0.0.1:8000`.
    pub fn new(base_url: impl Into<String>) -> RestResult<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| RestError::HttpClient(format!("Failed to create HTTP client: {e}")))?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> RestResult<T> {
        debug!(path, "Gateway GET");
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .send()
            .await
            .map_err(|e| RestError::HttpClient(format!("HTTP request failed: {e}")))?;
        decode_response(response).await
    }

    async fn place(&self, request: &OrderRequest) -> RestResult<OrderAck> {
        request.validate()?;
        let response = self
            .client
            .post(format!("{}/api/orders/place", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| RestError::HttpClient(format!("HTTP request failed: {e}")))?;
        let envelope: OrderEnvelope = decode_response(response).await?;
        Ok(envelope.order)
    }

    /// Ask the gateway to retry an upstream stream (`market_feed` or
    /// `user_data`) that is backing off or gave up.
    pub async fn reset_stream(&self, role: &str) -> RestResult<StreamResetEnvelope> {
        debug!(role, "Gateway stream reset");
        let response = self
            .client
            .post(format!("{}/api/stream/{role}/reset", self.base_url))
            .send()
            .await
            .map_err(|e| RestError::HttpClient(format!("HTTP request failed: {e}")))?;
        decode_response(response).await
    }

    async fn cancel(&self, order_id: OrderId, symbol: &str) -> RestResult<OrderAck> {
        let query = CancelQuery {
            symbol: perpdesk_core::normalize_symbol(symbol),
        };
        let response = self
            .client
            .delete(format!("{}/api/orders/{order_id}", self.base_url))
            .query(&query)
            .send()
            .await
            .map_err(|e| RestError::HttpClient(format!("HTTP request failed: {e}")))?;
        let envelope: OrderEnvelope = decode_response(response).await?;
        Ok(envelope.order)
    }
}

impl ExchangeApi for GatewayApiClient {
    fn place_order<'a>(&'a self, request: &'a OrderRequest) -> BoxFuture<'a, RestResult<OrderAck>> {
        Box::pin(self.place(request))
    }

    fn cancel_order<'a>(
        &'a self,
        order_id: OrderId,
        symbol: &'a str,
    ) -> BoxFuture<'a, RestResult<OrderAck>> {
        Box::pin(self.cancel(order_id, symbol))
    }

    fn get_balance(&self) -> BoxFuture<'_, RestResult<AccountBalance>> {
        Box::pin(async move {
            let envelope: BalanceEnvelope = self.get("/api/account/balance").await?;
            Ok(envelope.balance)
        })
    }

    fn get_positions(&self) -> BoxFuture<'_, RestResult<Vec<Position>>> {
        Box::pin(async move {
            let envelope: PositionsEnvelope = self.get("/api/account/positions").await?;
            Ok(envelope.positions)
        })
    }

    fn get_open_orders(&self) -> BoxFuture<'_, RestResult<Vec<Order>>> {
        Box::pin(async move {
            let envelope: OrdersEnvelope = self.get("/api/orders/open").await?;
            Ok(envelope.orders)
        })
    }
}
