//! REST client error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RestError {
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    /// Non-success response. `code` is the exchange error code when the
    /// body carried one.
    #[error("API error (HTTP {status}): {message}")]
    Api {
        status: u16,
        code: Option<i64>,
        message: String,
    },

    #[error("Response decode error: {0}")]
    Decode(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Missing API credentials: {0}")]
    MissingCredentials(String),

    #[error("Invalid order: {0}")]
    InvalidOrder(#[from] perpdesk_core::CoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RestError {
    /// Short text suitable for a UI error banner.
    pub fn user_message(&self) -> String {
        match self {
            Self::Api { message, .. } => message.clone(),
            Self::MissingCredentials(_) => "API credentials are not configured".to_string(),
            other => other.to_string(),
        }
    }
}

pub type RestResult<T> = Result<T, RestError>;
