//! WebSocket error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Connection errored: {0}")]
    ConnectionErrored(String),

    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Message parse error: {0}")]
    ParseError(String),

    #[error("Heartbeat timeout after {missed} missed pongs")]
    HeartbeatTimeout { missed: u32 },

    #[error("Reconnect requested: {0}")]
    ReconnectRequested(String),

    #[error("Gave up after {attempts} attempts")]
    GaveUp { attempts: u32 },

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type WsResult<T> = Result<T, WsError>;
