//! Error responses for proxied requests
//!
//! Full error detail is logged; the client only sees a generic message unless
//! the error is known to be safe to show.

use axum::body::Body;
use axum::http::{HeaderValue, Response, header};
use tracing::{error, warn};
use venue_gateway_common::GatewayError;

/// Header naming the gateway-side failure on error responses
pub const GATEWAY_ERROR_HEADER: &str = "x-gateway-error";

/// Message shown to the client for `e`
pub fn client_message(e: &GatewayError) -> String {
    if e.is_client_safe() {
        warn!("Client error: {}", e);
        return e.to_string();
    }

    error!("Proxy error: {}", e);
    match e {
        GatewayError::UpstreamUnavailable(_) => "Bad Gateway: upstream unavailable".to_string(),
        GatewayError::UpstreamTimeout(_) => "Gateway Timeout: no response from upstream".to_string(),
        GatewayError::ProxyWriteFailure(_) | GatewayError::ProxyReadFailure(_) => {
            "Bad Gateway: upstream request failed".to_string()
        }
        _ => "Internal server error".to_string(),
    }
}

/// Plain-text error response carrying the sanitized message
pub fn error_response(e: &GatewayError) -> Response<Body> {
    let status = e.status_code();
    let mut response = Response::new(Body::from(client_message(e)));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    if let Some(reason) = status.canonical_reason() {
        headers.insert(GATEWAY_ERROR_HEADER, HeaderValue::from_static(reason));
    }

    response
}
