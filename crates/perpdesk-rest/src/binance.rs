//! Binance USDⓈ-M futures REST client.
//!
//! Signed endpoints carry `timestamp` and `recvWindow`, an HMAC-SHA256
//! `signature` over the query string and the `X-MBX-APIKEY` header.
//! Listen-key endpoints only need the header. Every request goes through
//! the pacer so consecutive calls start at least 100ms apart.

use crate::api::{ExchangeApi, UserStreamApi};
use crate::envelope::ErrorEnvelope;
use crate::error::{RestError, RestResult};
use crate::pacer::{RequestPacer, DEFAULT_MIN_INTERVAL};
use crate::signer::{encode_query, ApiCredentials};
use futures_util::future::BoxFuture;
use perpdesk_core::{
    now_ms, AccountBalance, AssetBalance, Order, OrderAck, OrderId, OrderRequest,
    OrderSide, OrderStatus, OrderType, Position, Price, Size, TimeInForce,
};
use reqwest::{Client, Method, Response};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Futures testnet REST base URL.
pub const TESTNET_REST_URL: &str = "https://testnet.binancefuture.com";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RECV_WINDOW_MS: u64 = 5_000;
const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// REST client settings.
#[derive(Debug, Clone)]
pub struct BinanceRestConfig {
    pub base_url: String,
    pub recv_window_ms: u64,
    pub min_request_interval: Duration,
    pub timeout: Duration,
}

impl Default for BinanceRestConfig {
    fn default() -> Self {
        Self {
            base_url: TESTNET_REST_URL.to_string(),
            recv_window_ms: DEFAULT_RECV_WINDOW_MS,
            min_request_interval: DEFAULT_MIN_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAccount {
    total_wallet_balance: Decimal,
    available_balance: Decimal,
    total_unrealized_profit: Decimal,
    #[serde(default)]
    assets: Vec<RawAsset>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAsset {
    asset: String,
    wallet_balance: Decimal,
    available_balance: Decimal,
    unrealized_profit: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPositionRisk {
    symbol: String,
    position_amt: Size,
    entry_price: Price,
    #[serde(rename = "unRealizedProfit")]
    unrealized_profit: Decimal,
    #[serde(default)]
    mark_price: Option<Price>,
    #[serde(default)]
    update_time: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOrder {
    order_id: u64,
    #[serde(default)]
    client_order_id: Option<String>,
    symbol: String,
    side: OrderSide,
    #[serde(rename = "type")]
    order_type: OrderType,
    orig_qty: Size,
    #[serde(default)]
    executed_qty: Option<Size>,
    price: Price,
    #[serde(default)]
    stop_price: Option<Price>,
    status: OrderStatus,
    #[serde(default)]
    update_time: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOrderAck {
    order_id: u64,
    symbol: String,
    status: OrderStatus,
    #[serde(default)]
    client_order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawListenKey {
    listen_key: String,
}

impl From<RawAccount> for AccountBalance {
    fn from(raw: RawAccount) -> Self {
        Self {
            total_wallet_balance: raw.total_wallet_balance,
            available_balance: raw.available_balance,
            total_unrealized_pnl: raw.total_unrealized_profit,
            assets: raw
                .assets
                .into_iter()
                .map(|a| AssetBalance {
                    asset: a.asset,
                    wallet_balance: a.wallet_balance,
                    available_balance: a.available_balance,
                    unrealized_pnl: a.unrealized_profit,
                })
                .collect(),
        }
    }
}

impl From<RawPositionRisk> for Position {
    fn from(raw: RawPositionRisk) -> Self {
        Self {
            symbol: raw.symbol,
            quantity: raw.position_amt,
            entry_price: raw.entry_price,
            unrealized_pnl: raw.unrealized_profit,
            mark_price: raw.mark_price,
            update_time_ms: raw.update_time,
        }
    }
}

impl From<RawOrder> for Order {
    fn from(raw: RawOrder) -> Self {
        Self {
            order_id: OrderId(raw.order_id),
            client_order_id: raw.client_order_id,
            symbol: raw.symbol,
            side: raw.side,
            order_type: raw.order_type,
            quantity: raw.orig_qty,
            executed_qty: raw.executed_qty.unwrap_or(Size::ZERO),
            price: raw.price.non_zero(),
            stop_price: raw.stop_price.and_then(Price::non_zero),
            status: raw.status,
            update_time_ms: raw.update_time,
        }
    }
}

impl From<RawOrderAck> for OrderAck {
    fn from(raw: RawOrderAck) -> Self {
        Self {
            order_id: OrderId(raw.order_id),
            symbol: raw.symbol,
            status: raw.status,
            client_order_id: raw.client_order_id,
        }
    }
}

/// Parameters for `POST /fapi/v1/order`, in the order they are signed.
pub fn order_params(request: &OrderRequest) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("symbol", request.symbol.clone()),
        ("side", request.side.to_string()),
        ("type", request.order_type.as_str().to_string()),
        ("quantity", request.quantity.to_string()),
    ];
    if let Some(price) = request.price.filter(|_| request.order_type.requires_price()) {
        params.push(("price", price.to_string()));
        let tif = request.time_in_force.unwrap_or(TimeInForce::Gtc);
        params.push(("timeInForce", tif.to_string()));
    }
    if let Some(stop) = request
        .stop_price
        .filter(|_| request.order_type.requires_stop_price())
    {
        params.push(("stopPrice", stop.to_string()));
    }
    if request.reduce_only {
        params.push(("reduceOnly", "true".to_string()));
    }
    let client_id = request.client_order_id.clone().unwrap_or_default();
    params.push(("newClientOrderId", client_id.to_string()));
    params
}

/// Signed REST client. Without credentials only unsigned calls succeed;
/// account calls fail with [`RestError::MissingCredentials`].
pub struct BinanceRestClient {
    client: Client,
    config: BinanceRestConfig,
    credentials: Option<ApiCredentials>,
    pacer: RequestPacer,
}

impl BinanceRestClient {
    pub fn new(config: BinanceRestConfig, credentials: Option<ApiCredentials>) -> RestResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RestError::HttpClient(format!("Failed to create HTTP client: {e}")))?;
        let pacer = RequestPacer::new(config.min_request_interval);

        Ok(Self {
            client,
            config,
            credentials,
            pacer,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    fn credentials(&self) -> RestResult<&ApiCredentials> {
        self.credentials.as_ref().ok_or_else(|| {
            RestError::MissingCredentials("account endpoints need an API key".to_string())
        })
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(&str, String)>,
    ) -> RestResult<T> {
        let credentials = self.credentials()?;
        params.push(("recvWindow", self.config.recv_window_ms.to_string()));
        params.push(("timestamp", now_ms().to_string()));
        let query = encode_query(&params);
        let signature = credentials.signer().sign(&query)?;
        let url = format!(
            "{}{path}?{query}&signature={signature}",
            self.config.base_url
        );

        self.pacer.wait().await;
        debug!(%method, path, "Signed REST request");
        let response = self
            .client
            .request(method, &url)
            .header(API_KEY_HEADER, credentials.api_key())
            .send()
            .await
            .map_err(|e| RestError::HttpClient(format!("HTTP request failed: {e}")))?;

        decode_response(response).await
    }

    async fn keyed<T: DeserializeOwned>(&self, method: Method, path: &str) -> RestResult<T> {
        let credentials = self.credentials()?;
        let url = format!("{}{path}", self.config.base_url);

        self.pacer.wait().await;
        let response = self
            .client
            .request(method, &url)
            .header(API_KEY_HEADER, credentials.api_key())
            .send()
            .await
            .map_err(|e| RestError::HttpClient(format!("HTTP request failed: {e}")))?;

        decode_response(response).await
    }

    pub async fn fetch_balance(&self) -> RestResult<AccountBalance> {
        let raw: RawAccount = self
            .signed(Method::GET, "/fapi/v2/account", Vec::new())
            .await?;
        Ok(raw.into())
    }

    pub async fn fetch_positions(&self) -> RestResult<Vec<Position>> {
        let raw: Vec<RawPositionRisk> = self
            .signed(Method::GET, "/fapi/v2/positionRisk", Vec::new())
            .await?;
        Ok(raw.into_iter().map(Position::from).collect())
    }

    pub async fn fetch_open_orders(&self) -> RestResult<Vec<Order>> {
        let raw: Vec<RawOrder> = self
            .signed(Method::GET, "/fapi/v1/openOrders", Vec::new())
            .await?;
        Ok(raw.into_iter().map(Order::from).collect())
    }

    pub async fn submit_order(&self, request: &OrderRequest) -> RestResult<OrderAck> {
        request.validate()?;
        info!(
            symbol = %request.symbol,
            side = %request.side,
            order_type = %request.order_type,
            quantity = %request.quantity,
            "Placing order"
        );
        let raw: RawOrderAck = self
            .signed(Method::POST, "/fapi/v1/order", order_params(request))
            .await?;
        Ok(raw.into())
    }

    pub async fn submit_cancel(&self, order_id: OrderId, symbol: &str) -> RestResult<OrderAck> {
        info!(%order_id, symbol, "Cancelling order");
        let params = vec![
            ("symbol", perpdesk_core::normalize_symbol(symbol)),
            ("orderId", order_id.to_string()),
        ];
        let raw: RawOrderAck = self
            .signed(Method::DELETE, "/fapi/v1/order", params)
            .await?;
        Ok(raw.into())
    }

    pub async fn new_listen_key(&self) -> RestResult<String> {
        let raw: RawListenKey = self.keyed(Method::POST, "/fapi/v1/listenKey").await?;
        info!("Created user-data listen key");
        Ok(raw.listen_key)
    }

    pub async fn extend_listen_key(&self) -> RestResult<()> {
        let _: serde_json::Value = self.keyed(Method::PUT, "/fapi/v1/listenKey").await?;
        debug!("Listen key kept alive");
        Ok(())
    }
}

impl ExchangeApi for BinanceRestClient {
    fn place_order<'a>(&'a self, request: &'a OrderRequest) -> BoxFuture<'a, RestResult<OrderAck>> {
        Box::pin(self.submit_order(request))
    }

    fn cancel_order<'a>(
        &'a self,
        order_id: OrderId,
        symbol: &'a str,
    ) -> BoxFuture<'a, RestResult<OrderAck>> {
        Box::pin(self.submit_cancel(order_id, symbol))
    }

    fn get_balance(&self) -> BoxFuture<'_, RestResult<AccountBalance>> {
        Box::pin(self.fetch_balance())
    }

    fn get_positions(&self) -> BoxFuture<'_, RestResult<Vec<Position>>> {
        Box::pin(self.fetch_positions())
    }

    fn get_open_orders(&self) -> BoxFuture<'_, RestResult<Vec<Order>>> {
        Box::pin(self.fetch_open_orders())
    }
}

impl UserStreamApi for BinanceRestClient {
    fn create_listen_key(&self) -> BoxFuture<'_, RestResult<String>> {
        Box::pin(self.new_listen_key())
    }

    fn keepalive_listen_key(&self) -> BoxFuture<'_, RestResult<()>> {
        Box::pin(self.extend_listen_key())
    }
}

/// Turn a response into `T`, mapping exchange error bodies to [`RestError::Api`].
pub(crate) async fn decode_response<T: DeserializeOwned>(response: Response) -> RestResult<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| RestError::HttpClient(format!("Failed to read response: {e}")))?;

    if !status.is_success() {
        let (code, message) = if let Ok(err) = serde_json::from_str::<ApiErrorBody>(&body) {
            (Some(err.code), err.msg)
        } else if let Ok(err) = serde_json::from_str::<ErrorEnvelope>(&body) {
            (None, err.detail)
        } else {
            (None, body)
        };
        warn!(status = status.as_u16(), ?code, %message, "REST request rejected");
        return Err(RestError::Api {
            status: status.as_u16(),
            code,
            message,
        });
    }

    serde_json::from_str(&body).map_err(|e| RestError::Decode(format!("{e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use perpdesk_core::ClientOrderId;
    use rust_decimal_macros::dec;

    #[test]
    fn test_position_risk_keeps_flat_entries() {
        let body = r#"[
            {"symbol":"BTCUSDT","positionAmt":"0.000","entryPrice":"0.0","markPrice":"64000.10",
             "unRealizedProfit":"0.00000000","updateTime":0},
            {"symbol":"ETHUSDT","positionAmt":"-1.500","entryPrice":"3100.5","markPrice":"3000.0",
             "unRealizedProfit":"150.75","updateTime":1700000000000}
        ]"#;
        let raw: Vec<RawPositionRisk> = serde_json::from_str(body).unwrap();
        let positions: Vec<Position> = raw.into_iter().map(Position::from).collect();

        assert_eq!(positions.len(), 2);
        assert!(!positions[0].is_open());
        assert_eq!(positions[1].quantity, Size::new(dec!(-1.5)));
        assert_eq!(positions[1].unrealized_pnl, dec!(150.75));
    }

    #[test]
    fn test_open_order_drops_zero_prices() {
        let body = r#"{"orderId":42,"clientOrderId":"pd_1_abc","symbol":"BTCUSDT","side":"BUY",
            "type":"STOP_MARKET","origQty":"0.010","executedQty":"0","price":"0",
            "stopPrice":"59000","status":"NEW","timeInForce":"GTC","updateTime":1700000000001}"#;
        let order: Order = serde_json::from_str::<RawOrder>(body).unwrap().into();

        assert_eq!(order.order_id, OrderId(42));
        assert_eq!(order.order_type, OrderType::StopMarket);
        assert_eq!(order.price, None);
        assert_eq!(order.stop_price, Some(Price::new(dec!(59000))));
        assert!(order.is_open());
    }

    #[test]
    fn test_account_balance_mapping() {
        let body = r#"{"totalWalletBalance":"1000.5","availableBalance":"900","totalUnrealizedProfit":"-3.25",
            "assets":[{"asset":"USDT","walletBalance":"1000.5","availableBalance":"900","unrealizedProfit":"-3.25"}]}"#;
        let balance: AccountBalance = serde_json::from_str::<RawAccount>(body).unwrap().into();
        assert_eq!(balance.total_wallet_balance, dec!(1000.5));
        assert_eq!(balance.assets[0].asset, "USDT");
    }

    #[test]
    fn test_limit_order_params() {
        let mut request = OrderRequest::limit(
            "btcusdt",
            OrderSide::Buy,
            Size::new(dec!(0.01)),
            Price::new(dec!(60000)),
        );
        request.client_order_id = Some(ClientOrderId::from_string("pd_test".to_string()));
        let params = order_params(&request);
        assert_eq!(
            encode_query(&params),
            "symbol=BTCUSDT&side=BUY&type=LIMIT&quantity=0.01&price=60000&timeInForce=GTC&newClientOrderId=pd_test"
        );
    }

    #[test]
    fn test_stop_limit_params_include_both_prices() {
        let request = OrderRequest {
            order_type: OrderType::Stop,
            price: Some(Price::new(dec!(58000))),
            stop_price: Some(Price::new(dec!(58500))),
            reduce_only: true,
            ..OrderRequest::market("ETHUSDT", OrderSide::Sell, Size::new(dec!(1)))
        };
        let params = order_params(&request);
        let keys: Vec<&str> = params.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            keys,
            vec![
                "symbol",
                "side",
                "type",
                "quantity",
                "price",
                "timeInForce",
                "stopPrice",
                "reduceOnly",
                "newClientOrderId"
            ]
        );
    }

    #[test]
    fn test_market_order_omits_price() {
        let mut request = OrderRequest::market("BTCUSDT", OrderSide::Sell, Size::new(dec!(2)));
        request.price = Some(Price::new(dec!(1)));
        let params = order_params(&request);
        assert!(params.iter().all(|(k, _)| *k != "price" && *k != "timeInForce"));
    }

    #[tokio::test]
    async fn test_account_calls_need_credentials() {
        let client = BinanceRestClient::new(BinanceRestConfig::default(), None).unwrap();
        assert!(!client.has_credentials());
        let err = client.fetch_positions().await.unwrap_err();
        assert!(matches!(err, RestError::MissingCredentials(_)));
    }
}
