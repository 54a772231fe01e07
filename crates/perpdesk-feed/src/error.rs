//! Feed error types.

use perpdesk_rest::RestError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Refresh of {panel} failed: {source}")]
    Refresh {
        panel: &'static str,
        #[source]
        source: RestError,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type FeedResult<T> = Result<T, FeedError>;
