//! REST collaborators for perpdesk.
//!
//! Provides:
//! - `ExchangeApi` / `UserStreamApi`: the seams the sync core and the
//!   user-data stream depend on
//! - `BinanceRestClient`: signed futures REST with request pacing
//! - `GatewayApiClient`: the same seam backed by the gateway's endpoints
//! - Envelope types for the gateway's REST responses

pub mod api;
pub mod binance;
pub mod envelope;
pub mod error;
pub mod gateway;
pub mod pacer;
pub mod signer;

pub use api::{ExchangeApi, UserStreamApi};
pub use binance::{order_params, BinanceRestClient, BinanceRestConfig, TESTNET_REST_URL};
pub use envelope::{
    BalanceEnvelope, CancelQuery, ErrorEnvelope, OrderEnvelope, OrdersEnvelope, PositionsEnvelope,
    StreamResetEnvelope,
};
pub use error::{RestError, RestResult};
pub use gateway::GatewayApiClient;
pub use pacer::{RequestPacer, DEFAULT_MIN_INTERVAL};
pub use signer::{encode_query, ApiCredentials, RequestSigner};
