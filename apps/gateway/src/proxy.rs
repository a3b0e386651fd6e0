//! REST reverse proxy
//!
//! Requests under a configured prefix are forwarded to the route's target with
//! method, headers, query, and body intact, and the upstream response is
//! streamed back unchanged apart from hop-by-hop headers.

use axum::body::Body;
use axum::http::header::{CONTENT_LENGTH, HOST};
use axum::http::{Request, Response};
use bytes::{Bytes, BytesMut};
use futures_util::{StreamExt, TryStreamExt};
use reqwest::Client;
use std::time::Instant;
use tracing::{debug, info, warn};
use venue_gateway_common::{
    GatewayError, Result, RouteTable, generate_request_id, strip_hop_by_hop,
};

use crate::error_handling::error_response;

#[derive(Debug, Clone)]
pub struct ReverseProxy {
    routes: RouteTable,
    client: Client,
    max_body_size: usize,
}

impl ReverseProxy {
    pub fn new(routes: RouteTable, client: Client, max_body_size: usize) -> Self {
        Self {
            routes,
            client,
            max_body_size,
        }
    }

    /// Whether some route claims `path`, even if the path itself is rejected later
    pub fn matches(&self, path: &str) -> bool {
        !matches!(
            self.routes.resolve(path),
            Err(GatewayError::RouteNotFound(_))
        )
    }

    /// Forward one request; failures become sanitized error responses
    pub async fn route(&self, request: Request<Body>) -> Response<Body> {
        match self.forward(request).await {
            Ok(response) => response,
            Err(e) => error_response(&e),
        }
    }

    async fn forward(&self, request: Request<Body>) -> Result<Response<Body>> {
        let request_id = generate_request_id();
        let started = Instant::now();
        let (parts, body) = request.into_parts();

        let resolved = self.routes.resolve(parts.uri.path())?;
        let url = resolved.upstream_url(parts.uri.query());

        let declared_length = parts
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if let Some(length) = declared_length.filter(|l| *l > self.max_body_size as u64) {
            return Err(GatewayError::BodyTooLarge(length, self.max_body_size));
        }

        let body = read_body(body, self.max_body_size).await?;

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(HOST);
        headers.remove(CONTENT_LENGTH);

        debug!(
            "Proxy request {}: {} {} -> {}",
            request_id, parts.method, parts.uri, url
        );

        let mut upstream_request = self
            .client
            .request(parts.method.clone(), url.clone())
            .headers(headers);
        if !body.is_empty() || declared_length.is_some() {
            upstream_request = upstream_request.body(body);
        }

        let upstream = upstream_request.send().await.map_err(|e| {
            warn!("Proxy request {} to {} failed: {}", request_id, url, e);
            classify_send_error(&e)
        })?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);

        info!(
            "Proxy request {}: {} {} -> {} ({:?})",
            request_id,
            parts.method,
            parts.uri.path(),
            status.as_u16(),
            started.elapsed()
        );

        let stream = upstream.bytes_stream().inspect_err(move |e| {
            let err = GatewayError::ProxyReadFailure(e.to_string());
            warn!("Proxy request {} aborted mid-body: {}", request_id, err);
        });

        let mut response = Response::new(Body::from_stream(stream));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Buffer a request body, failing as soon as it grows past `limit`
async fn read_body(body: Body, limit: usize) -> Result<Bytes> {
    let mut chunks = body.into_data_stream();
    let mut buffer = BytesMut::new();

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.map_err(|e| GatewayError::InvalidRequestBody(e.to_string()))?;
        let received = buffer.len() + chunk.len();
        if received > limit {
            return Err(GatewayError::BodyTooLarge(received as u64, limit));
        }
        buffer.extend_from_slice(&chunk);
    }

    Ok(buffer.freeze())
}

/// Map a failed upstream send onto the error taxonomy
fn classify_send_error(e: &reqwest::Error) -> GatewayError {
    if e.is_connect() {
        GatewayError::UpstreamUnavailable(e.to_string())
    } else if e.is_timeout() {
        GatewayError::UpstreamTimeout(e.to_string())
    } else {
        GatewayError::ProxyWriteFailure(e.to_string())
    }
}
