//! End-to-end tests: a real gateway in front of a fake hub

use axum::Router;
use axum::extract::Query;
use axum::extract::ws::{CloseFrame, Message as HubMessage, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use crate::config::Config;
use crate::registry::SessionRegistry;
use crate::server::Gateway;

type Browser = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);
const INDEX: &str = "<html>venue dashboard</html>";

async fn hub_socket(ws: WebSocketUpgrade, Query(params): Query<HashMap<String, String>>) -> Response {
    ws.on_upgrade(move |socket| hub_session(socket, params))
}

/// Echo until the browser leaves, or close at once when asked via `?close=`
async fn hub_session(mut socket: WebSocket, params: HashMap<String, String>) {
    if let Some(code) = params.get("close").and_then(|c| c.parse::<u16>().ok()) {
        let _ = socket
            .send(HubMessage::Close(Some(CloseFrame {
                code,
                reason: "venue closed".into(),
            })))
            .await;
        return;
    }

    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            HubMessage::Text(_) | HubMessage::Binary(_) => {
                if socket.send(msg).await.is_err() {
                    break;
                }
            }
            HubMessage::Close(_) => break,
            _ => {}
        }
    }
}

async fn start_hub() -> SocketAddr {
    let app = Router::new()
        .route("/ws", get(hub_socket))
        .route("/status", get(|| async { "hub ok" }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

struct RunningGateway {
    addr: SocketAddr,
    registry: SessionRegistry,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<anyhow::Result<()>>,
    _assets: TempDir,
}

async fn start_gateway(hub_port: u16, tune: impl FnOnce(&mut Config)) -> RunningGateway {
    let assets = tempfile::tempdir().unwrap();
    std::fs::write(assets.path().join("index.html"), INDEX).unwrap();

    let hub = Url::parse(&format!("http://127.0.0.1:{}", hub_port)).unwrap();
    let mut config = Config::new(hub, assets.path()).unwrap();
    tune(&mut config);

    let gateway = Gateway::bind(config).await.unwrap();
    let addr = gateway.local_addr();
    let registry = gateway.registry().clone();
    let (shutdown, stop) = oneshot::channel::<()>();
    let task = tokio::spawn(gateway.run(async move {
        let _ = stop.await;
    }));

    RunningGateway {
        addr,
        registry,
        shutdown,
        task,
        _assets: assets,
    }
}

async fn open_browser(gateway: SocketAddr, path_and_query: &str) -> Browser {
    let (socket, _) = connect_async(format!("ws://{}{}", gateway, path_and_query))
        .await
        .unwrap();
    socket
}

async fn next_message(socket: &mut Browser) -> Message {
    tokio::time::timeout(WAIT, socket.next())
        .await
        .expect("timed out waiting for a message")
        .expect("stream ended")
        .expect("read failed")
}

async fn expect_close(socket: &mut Browser) -> (u16, String) {
    loop {
        match next_message(socket).await {
            Message::Close(Some(frame)) => {
                return (u16::from(frame.code), frame.reason.as_str().to_owned());
            }
            Message::Close(None) => return (1005, String::new()),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected close, got {:?}", other),
        }
    }
}

async fn wait_until_empty(registry: &SessionRegistry) {
    let deadline = Instant::now() + WAIT;
    while !registry.is_empty() {
        assert!(Instant::now() < deadline, "{} session(s) never closed", registry.len());
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_relay_preserves_order_and_kind() {
    let hub = start_hub().await;
    let gateway = start_gateway(hub.port(), |_| {}).await;
    let mut browser = open_browser(gateway.addr, "/ws").await;

    for i in 0..100 {
        browser.send(Message::text(format!("seq-{}", i))).await.unwrap();
    }
    let payload = Bytes::from_static(&[0xde, 0xad, 0x00, 0xbe, 0xef]);
    browser.send(Message::binary(payload.clone())).await.unwrap();

    for i in 0..100 {
        assert_eq!(next_message(&mut browser).await, Message::text(format!("seq-{}", i)));
    }
    assert_eq!(next_message(&mut browser).await, Message::binary(payload));

    let sessions = gateway.registry.snapshot();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].frames_to_upstream, 101);

    browser.close(None).await.unwrap();
    wait_until_empty(&gateway.registry).await;
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let hub = start_hub().await;
    let gateway = start_gateway(hub.port(), |_| {}).await;
    let mut first = open_browser(gateway.addr, "/ws").await;
    let mut second = open_browser(gateway.addr, "/ws").await;

    first.send(Message::text("from-first")).await.unwrap();
    second.send(Message::text("from-second")).await.unwrap();
    assert_eq!(next_message(&mut first).await, Message::text("from-first"));
    assert_eq!(next_message(&mut second).await, Message::text("from-second"));

    drop(first);

    second.send(Message::text("still here")).await.unwrap();
    assert_eq!(next_message(&mut second).await, Message::text("still here"));

    let deadline = Instant::now() + WAIT;
    while gateway.registry.len() != 1 {
        assert!(Instant::now() < deadline, "first session never deregistered");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_hub_close_and_query_reach_browser() {
    let hub = start_hub().await;
    let gateway = start_gateway(hub.port(), |_| {}).await;
    let mut browser = open_browser(gateway.addr, "/ws?close=4001").await;

    let (code, reason) = expect_close(&mut browser).await;
    assert_eq!(code, 4001);
    assert_eq!(reason, "venue closed");
    wait_until_empty(&gateway.registry).await;
}

#[tokio::test]
async fn test_unreachable_hub_closes_browser_with_1011() {
    let port = closed_port().await;
    let gateway = start_gateway(port, |config| {
        config.connect_timeout = Duration::from_secs(1);
    })
    .await;

    let started = Instant::now();
    let mut browser = open_browser(gateway.addr, "/ws").await;
    let (code, reason) = expect_close(&mut browser).await;

    assert_eq!(code, 1011);
    assert_eq!(reason, "upstream unavailable");
    assert!(started.elapsed() < Duration::from_secs(3));
    wait_until_empty(&gateway.registry).await;
}

#[tokio::test]
async fn test_shutdown_closes_every_session() {
    let hub = start_hub().await;
    let gateway = start_gateway(hub.port(), |config| {
        config.shutdown_grace = Duration::from_secs(2);
    })
    .await;

    let mut browsers = Vec::new();
    for _ in 0..3 {
        let mut browser = open_browser(gateway.addr, "/ws").await;
        browser.send(Message::text("ping")).await.unwrap();
        assert_eq!(next_message(&mut browser).await, Message::text("ping"));
        browsers.push(browser);
    }
    assert_eq!(gateway.registry.len(), 3);

    gateway.shutdown.send(()).unwrap();

    for browser in browsers.iter_mut() {
        let (code, reason) = expect_close(browser).await;
        assert_eq!(code, 1001);
        assert_eq!(reason, "gateway shutting down");
    }

    tokio::time::timeout(WAIT, gateway.task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(gateway.registry.is_empty());
}

#[tokio::test]
async fn test_rest_and_dashboard_through_gateway() {
    let hub = start_hub().await;
    let gateway = start_gateway(hub.port(), |_| {}).await;
    let client = reqwest::Client::new();

    let status = client
        .get(format!("http://{}/api/status", gateway.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(status.status(), reqwest::StatusCode::OK);
    assert_eq!(status.text().await.unwrap(), "hub ok");

    let page = client
        .get(format!("http://{}/venues/2/zones", gateway.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(page.status(), reqwest::StatusCode::OK);
    assert_eq!(page.text().await.unwrap(), INDEX);
}

#[tokio::test]
async fn test_oversized_browser_message_ends_session() {
    let hub = start_hub().await;
    let gateway = start_gateway(hub.port(), |config| {
        config.max_message_size = 1024;
    })
    .await;
    let mut browser = open_browser(gateway.addr, "/ws").await;

    browser.send(Message::text("small")).await.unwrap();
    assert_eq!(next_message(&mut browser).await, Message::text("small"));

    browser
        .send(Message::binary(Bytes::from(vec![1u8; 4096])))
        .await
        .unwrap();

    let (code, _) = expect_close(&mut browser).await;
    assert_eq!(code, 1009);
    wait_until_empty(&gateway.registry).await;
}

/// Hub that promises a 100-byte body, sends 5 bytes and hangs up
async fn start_truncating_hub() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 100\r\n\r\nhello")
                    .await;
                let _ = stream.flush().await;
            });
        }
    });
    addr
}

#[tokio::test]
async fn test_truncated_hub_response_aborts_client_body() {
    let hub = start_truncating_hub().await;
    let gateway = start_gateway(hub.port(), |_| {}).await;

    let response = reqwest::Client::new()
        .get(format!("http://{}/api/venues/1/history", gateway.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let body = tokio::time::timeout(WAIT, response.bytes()).await.unwrap();
    assert!(body.is_err(), "truncated body was delivered as complete");
}
