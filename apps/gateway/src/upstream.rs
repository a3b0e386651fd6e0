//! Upstream connector
//!
//! Opens connections to the hub on behalf of browser clients: one WebSocket per
//! relay session, and a pooled HTTP client for proxied REST calls. A dial is a
//! single bounded attempt; retrying is left to the caller.

use reqwest::Client;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_with_config};
use tracing::{debug, warn};
use url::Url;
use venue_gateway_common::{GatewayError, Result, websocket_url};

use crate::config::Config;

/// WebSocket connection to the hub
pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct UpstreamConnector {
    hub_url: Url,
    hub_relay_path: String,
    connect_timeout: Duration,
    ws_config: WebSocketConfig,
    http: Client,
}

impl UpstreamConnector {
    pub fn new(config: &Config) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GatewayError::InvalidConfig(format!("failed to build HTTP client: {}", e)))?;

        let ws_config = WebSocketConfig::default()
            .max_message_size(Some(config.max_message_size))
            .max_frame_size(Some(config.max_message_size));

        Ok(Self {
            hub_url: config.hub_url.clone(),
            hub_relay_path: config.hub_relay_path.clone(),
            connect_timeout: config.connect_timeout,
            ws_config,
            http,
        })
    }

    /// HTTP client used for REST forwarding
    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Hub relay endpoint for a client that connected with `query`
    pub fn websocket_url(&self, query: Option<&str>) -> Result<Url> {
        websocket_url(&self.hub_url, &self.hub_relay_path, query)
    }

    /// Open one WebSocket to `url`
    ///
    /// Fails with `UpstreamUnavailable` if the hub refuses, the handshake fails,
    /// or nothing completes within the connect timeout.
    pub async fn dial(&self, url: &Url) -> Result<UpstreamSocket> {
        debug!("Dialing hub at {}", url);

        let attempt = connect_async_with_config(url.as_str(), Some(self.ws_config), true);
        match tokio::time::timeout(self.connect_timeout, attempt).await {
            Ok(Ok((socket, response))) => {
                debug!("Hub accepted relay connection ({})", response.status());
                Ok(socket)
            }
            Ok(Err(e)) => {
                warn!("Hub dial to {} failed: {}", url, e);
                Err(GatewayError::UpstreamUnavailable(e.to_string()))
            }
            Err(_) => {
                warn!(
                    "Hub dial to {} timed out after {:?}",
                    url, self.connect_timeout
                );
                Err(GatewayError::UpstreamUnavailable(format!(
                    "connect timed out after {:?}",
                    self.connect_timeout
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::net::TcpListener;

    fn connector(hub: &str, connect_timeout: Duration) -> UpstreamConnector {
        let mut config = Config::new(Url::parse(hub).unwrap(), "ui/dist").unwrap();
        config.connect_timeout = connect_timeout;
        UpstreamConnector::new(&config).unwrap()
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_websocket_url_derives_from_hub() {
        let connector = connector("http://127.0.0.1:7000", Duration::from_secs(5));
        assert_eq!(
            connector.websocket_url(None).unwrap().as_str(),
            "ws://127.0.0.1:7000/ws"
        );
        assert_eq!(
            connector.websocket_url(Some("venue=1")).unwrap().as_str(),
            "ws://127.0.0.1:7000/ws?venue=1"
        );
    }

    #[test]
    fn test_websocket_url_for_tls_hub() {
        let connector = connector("https://hub.venue.local", Duration::from_secs(5));
        assert_eq!(
            connector.websocket_url(None).unwrap().as_str(),
            "wss://hub.venue.local/ws"
        );
    }

    #[tokio::test]
    async fn test_dial_refused_is_upstream_unavailable() {
        let port = closed_port().await;
        let connector = connector(
            &format!("http://127.0.0.1:{}", port),
            Duration::from_secs(5),
        );
        let url = connector.websocket_url(None).unwrap();

        let result = connector.dial(&url).await;
        assert!(matches!(result, Err(GatewayError::UpstreamUnavailable(_))));
    }

    #[tokio::test]
    async fn test_dial_is_bounded_by_connect_timeout() {
        // Accepts TCP at the kernel level but never answers the handshake
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connector = connector(
            &format!("http://127.0.0.1:{}", port),
            Duration::from_millis(200),
        );
        let url = connector.websocket_url(None).unwrap();

        let started = Instant::now();
        let result = connector.dial(&url).await;
        let elapsed = started.elapsed();

        match result {
            Err(GatewayError::UpstreamUnavailable(msg)) => assert!(msg.contains("timed out")),
            other => panic!("expected timeout, got {:?}", other.map(|_| ())),
        }
        assert!(elapsed < Duration::from_secs(2), "dial took {:?}", elapsed);
        drop(listener);
    }
}
