//! perpdesk: real-time trading front end for Binance USDⓈ-M futures.
//!
//! Two entry points share one library:
//! - `serve`: the gateway. Supervises the exchange market and user-data
//!   streams, mirrors account state, and fans it out to browser sessions.
//! - `watch`: a terminal client of the gateway's trade socket and REST
//!   endpoints, running the same reconnect and sync machinery a browser does.

pub mod app;
pub mod config;
pub mod error;
pub mod instrument;
pub mod user_stream;
pub mod watch;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use watch::run_watch;
