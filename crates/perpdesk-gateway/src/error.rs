//! Gateway error types and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use perpdesk_feed::FeedError;
use perpdesk_rest::{ErrorEnvelope, RestError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),

    #[error("{0}")]
    NotConfigured(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Upstream(#[from] RestError),

    #[error("Refresh failed: {0}")]
    Refresh(#[from] FeedError),
}

fn upstream_status(error: &RestError) -> StatusCode {
    match error {
        RestError::InvalidOrder(_) => StatusCode::BAD_REQUEST,
        RestError::Api { status, .. } if (400..500).contains(status) => StatusCode::BAD_REQUEST,
        RestError::MissingCredentials(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_GATEWAY,
    }
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Upstream(e) | Self::Refresh(FeedError::Refresh { source: e, .. }) => {
                upstream_status(e)
            }
            Self::Refresh(_) => StatusCode::BAD_GATEWAY,
            Self::Bind { .. } | Self::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> String {
        match self {
            Self::Upstream(e) | Self::Refresh(FeedError::Refresh { source: e, .. }) => {
                e.user_message()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope {
            detail: self.detail(),
        };
        (self.status(), Json(body)).into_response()
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;
    use perpdesk_core::CoreError;

    #[test]
    fn test_status_mapping() {
        let rejected = GatewayError::Upstream(RestError::Api {
            status: 400,
            code: Some(-2019),
            message: "Margin is insufficient.".to_string(),
        });
        assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);
        assert_eq!(rejected.detail(), "Margin is insufficient.");

        let invalid = GatewayError::Upstream(RestError::InvalidOrder(CoreError::InvalidOrder(
            "symbol is required".to_string(),
        )));
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        let outage = GatewayError::Refresh(FeedError::Refresh {
            panel: "balance",
            source: RestError::Api {
                status: 503,
                code: None,
                message: "Service unavailable".to_string(),
            },
        });
        assert_eq!(outage.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(outage.detail(), "Service unavailable");

        assert_eq!(
            GatewayError::NotConfigured("no credentials".to_string()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
