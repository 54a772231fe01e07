//! Account and order REST endpoints.
//!
//! Reads re-query the exchange through the refresher and answer from the
//! refreshed mirror, so the browser and the trade socket see one state.

use crate::error::{GatewayError, GatewayResult};
use crate::state::{ExchangeAccess, GatewayState};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use perpdesk_core::{normalize_symbol, OrderId, OrderRequest};
use perpdesk_feed::{Panel, RefreshScope};
use perpdesk_rest::{
    BalanceEnvelope, CancelQuery, OrderEnvelope, OrdersEnvelope, PositionsEnvelope, RestError,
    StreamResetEnvelope,
};
use perpdesk_telemetry::Metrics;
use perpdesk_ws::ConnectionRole;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

fn exchange(state: &GatewayState) -> GatewayResult<&ExchangeAccess> {
    state.exchange.as_deref().ok_or_else(|| {
        GatewayError::NotConfigured("Exchange API credentials are not configured".to_string())
    })
}

pub(crate) async fn get_balance(
    State(state): State<GatewayState>,
) -> GatewayResult<Json<BalanceEnvelope>> {
    exchange(&state)?.refresher.refresh_balance().await?;
    let balance = state.mirrors.balance.snapshot().unwrap_or_default();
    Ok(Json(BalanceEnvelope { balance }))
}

/// Optional `?symbol=` narrowing for list endpoints.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct SymbolFilter {
    symbol: Option<String>,
}

impl SymbolFilter {
    fn matcher(&self) -> Option<String> {
        self.symbol
            .as_deref()
            .map(normalize_symbol)
            .filter(|s| !s.is_empty())
    }

    fn keeps(wanted: &Option<String>, symbol: &str) -> bool {
        wanted.as_deref().map_or(true, |w| w == symbol)
    }
}

/// Open positions only; flat entries stay in the mirror but are not listed.
pub(crate) async fn get_positions(
    State(state): State<GatewayState>,
    Query(filter): Query<SymbolFilter>,
) -> GatewayResult<Json<PositionsEnvelope>> {
    exchange(&state)?.refresher.refresh_positions().await?;
    let wanted = filter.matcher();
    let positions = state
        .mirrors
        .positions
        .open_positions()
        .into_iter()
        .filter(|p| SymbolFilter::keeps(&wanted, &p.symbol))
        .collect();
    Ok(Json(PositionsEnvelope { positions }))
}

pub(crate) async fn get_open_orders(
    State(state): State<GatewayState>,
    Query(filter): Query<SymbolFilter>,
) -> GatewayResult<Json<OrdersEnvelope>> {
    exchange(&state)?.refresher.refresh_orders().await?;
    let wanted = filter.matcher();
    let orders = state
        .mirrors
        .orders
        .snapshot()
        .into_iter()
        .filter(|o| SymbolFilter::keeps(&wanted, &o.symbol))
        .collect();
    Ok(Json(OrdersEnvelope { orders }))
}

pub(crate) async fn place_order(
    State(state): State<GatewayState>,
    Json(mut request): Json<OrderRequest>,
) -> GatewayResult<Json<OrderEnvelope>> {
    let access = exchange(&state)?;
    request.symbol = normalize_symbol(&request.symbol);
    request.validate().map_err(RestError::from)?;

    let ack = access.api.place_order(&request).await?;
    info!(
        order_id = %ack.order_id,
        symbol = %ack.symbol,
        side = %request.side,
        order_type = %request.order_type,
        "Order placed"
    );
    access.refresh.request(RefreshScope::Only(Panel::Orders));
    Ok(Json(OrderEnvelope::success(ack)))
}

pub(crate) async fn cancel_order(
    State(state): State<GatewayState>,
    Path(order_id): Path<u64>,
    Query(query): Query<CancelQuery>,
) -> GatewayResult<Json<OrderEnvelope>> {
    let access = exchange(&state)?;
    let symbol = normalize_symbol(&query.symbol);
    if symbol.is_empty() {
        return Err(GatewayError::InvalidRequest("symbol is required".to_string()));
    }

    let ack = access.api.cancel_order(OrderId(order_id), &symbol).await?;
    info!(order_id, symbol = %symbol, "Order cancelled");
    access.refresh.request(RefreshScope::Only(Panel::Orders));
    Ok(Json(OrderEnvelope::success(ack)))
}

/// Ask an upstream supervisor to retry now. Only a supervisor in backoff
/// or one that gave up acts on it; an open link ignores the request.
pub(crate) async fn reset_stream(
    State(state): State<GatewayState>,
    Path(role): Path<String>,
) -> GatewayResult<Json<StreamResetEnvelope>> {
    let role = match role.as_str() {
        "market_feed" => ConnectionRole::MarketFeed,
        "user_data" => ConnectionRole::UserData,
        other => return Err(GatewayError::NotFound(format!("Unknown stream: {other}"))),
    };
    let handle = state
        .upstream(role)
        .ok_or_else(|| GatewayError::NotConfigured(format!("{role} stream is not running")))?;

    let current = handle.state();
    info!(role = %role, state = current.as_str(), "Upstream reset requested");
    handle.reset();
    Ok(Json(StreamResetEnvelope {
        role: role.as_str().to_string(),
        state: current.as_str().to_string(),
    }))
}

#[derive(Debug, Serialize)]
pub(crate) struct HealthReport {
    status: &'static str,
    sessions: usize,
    market_feed: &'static str,
    user_data: &'static str,
    exchange_configured: bool,
}

pub(crate) async fn health(State(state): State<GatewayState>) -> Json<HealthReport> {
    Json(HealthReport {
        status: "ok",
        sessions: state.active_sessions(),
        market_feed: state
            .market
            .as_ref()
            .map(|m| m.state().as_str())
            .unwrap_or("disabled"),
        user_data: state
            .user
            .as_ref()
            .map(|u| u.state().as_str())
            .unwrap_or("disabled"),
        exchange_configured: state.has_exchange(),
    })
}

pub(crate) async fn metrics() -> Response {
    match Metrics::render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
