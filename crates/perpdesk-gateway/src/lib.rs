//! perpdesk-gateway - Browser-facing gateway.
//!
//! Provides:
//! - `/ws/trade`: per-session fan-out of market and account events with
//!   subscription filtering, heartbeat pings and slow-consumer eviction
//! - Account and order REST endpoints backed by the refreshed mirrors
//! - `/health` and `/metrics`

mod api;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod server;
pub mod session;
pub mod state;

pub use broadcast::{Broadcaster, SessionFilter, SessionRegistration};
pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use server::{create_router, run_server, serve};
pub use session::{ConnectionLimiter, ConnectionPermit};
pub use state::{ExchangeAccess, GatewayState};
