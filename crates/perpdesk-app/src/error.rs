//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] perpdesk_ws::WsError),

    #[error("Feed error: {0}")]
    Feed(#[from] perpdesk_feed::FeedError),

    #[error("REST error: {0}")]
    Rest(#[from] perpdesk_rest::RestError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] perpdesk_gateway::GatewayError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] perpdesk_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task failed: {0}")]
    Task(String),
}

pub type AppResult<T> = Result<T, AppError>;
