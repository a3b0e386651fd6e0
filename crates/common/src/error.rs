use http::StatusCode;
use thiserror::Error;

use crate::models::Leg;

/// Error types for the venue gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Upstream timed out: {0}")]
    UpstreamTimeout(String),

    #[error("{0} connection closed")]
    PeerClosed(Leg),

    #[error("Proxy write failure: {0}")]
    ProxyWriteFailure(String),

    #[error("Proxy read failure: {0}")]
    ProxyReadFailure(String),

    #[error("No route for path: {0}")]
    RouteNotFound(String),

    #[error("Request entity too large: {0} bytes (max: {1})")]
    BodyTooLarge(u64, usize),

    #[error("Invalid request body: {0}")]
    InvalidRequestBody(String),

    #[error("Invalid request path: {0}")]
    InvalidRequestPath(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl GatewayError {
    /// HTTP status reported to a REST caller for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::UpstreamUnavailable(_)
            | GatewayError::ProxyWriteFailure(_)
            | GatewayError::ProxyReadFailure(_) => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::RouteNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::BodyTooLarge(..) => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::InvalidRequestBody(_) | GatewayError::InvalidRequestPath(_) => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::PeerClosed(_)
            | GatewayError::InvalidConfig(_)
            | GatewayError::InvalidUrl(_)
            | GatewayError::SerializationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the message is safe to show to a client verbatim
    pub fn is_client_safe(&self) -> bool {
        matches!(
            self,
            GatewayError::RouteNotFound(_)
                | GatewayError::BodyTooLarge(..)
                | GatewayError::InvalidRequestBody(_)
                | GatewayError::InvalidRequestPath(_)
        )
    }
}

/// Type alias for Results using GatewayError
pub type Result<T> = std::result::Result<T, GatewayError>;
