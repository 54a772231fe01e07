//! HTTP server: router and serve loop.

use crate::api;
use crate::error::{GatewayError, GatewayResult};
use crate::session;
use crate::state::GatewayState;
use axum::routing::{delete, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::info;

/// Create the axum router.
pub fn create_router(state: GatewayState) -> Router {
    let router = Router::new()
        .route("/ws/trade", get(session::ws_handler))
        .route("/api/account/balance", get(api::get_balance))
        .route("/api/account/positions", get(api::get_positions))
        .route("/api/orders/open", get(api::get_open_orders))
        .route("/api/orders/place", post(api::place_order))
        .route("/api/orders/{order_id}", delete(api::cancel_order))
        .route("/api/stream/{role}/reset", post(api::reset_stream))
        .route("/health", get(api::health))
        .route("/metrics", get(api::metrics));

    let router = match &state.config.static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };

    router.layer(CorsLayer::permissive()).with_state(state)
}

/// Serve on an already bound listener until the state's shutdown token fires.
pub async fn serve(listener: TcpListener, state: GatewayState) -> GatewayResult<()> {
    let shutdown = state.shutdown_token();
    info!(addr = %listener.local_addr()?, "Gateway listening");

    let app = create_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Gateway stopped");
    Ok(())
}

/// Bind the configured address and serve.
pub async fn run_server(state: GatewayState) -> GatewayResult<()> {
    let addr = state.config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| GatewayError::Bind { addr: addr.clone(), source })?;
    serve(listener, state).await
}
