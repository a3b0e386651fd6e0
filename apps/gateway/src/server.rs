//! Gateway server
//!
//! One listener, one fallback handler. Every request is dispatched in a fixed
//! order: a WebSocket upgrade on the relay path starts a relay session, a
//! path claimed by a proxy route is forwarded, and everything else is served
//! from the dashboard assets.

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, FromRequestParts, Request, State};
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use venue_gateway_common::is_websocket_upgrade;

use crate::assets::StaticAssets;
use crate::config::Config;
use crate::proxy::ReverseProxy;
use crate::registry::SessionRegistry;
use crate::relay::{ClientConnection, RelaySettings, serve_client};
use crate::upstream::UpstreamConnector;

/// Everything the dispatcher needs, shared by all connections
#[derive(Debug)]
pub struct GatewayState {
    relay_path: String,
    max_message_size: usize,
    relay: RelaySettings,
    connector: UpstreamConnector,
    proxy: ReverseProxy,
    assets: StaticAssets,
    registry: SessionRegistry,
    tracker: TaskTracker,
}

impl GatewayState {
    pub fn new(config: &Config) -> Result<Self> {
        let connector =
            UpstreamConnector::new(config).context("failed to build upstream connector")?;
        let proxy = ReverseProxy::new(
            config.routes.clone(),
            connector.http().clone(),
            config.max_body_size,
        );

        Ok(Self {
            relay_path: config.relay_path.clone(),
            max_message_size: config.max_message_size,
            relay: RelaySettings {
                close_timeout: config.close_timeout,
                idle_timeout: config.idle_timeout,
            },
            connector,
            proxy,
            assets: StaticAssets::new(&config.static_dir),
            registry: SessionRegistry::new(),
            tracker: TaskTracker::new(),
        })
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }
}

pub fn build_router(state: Arc<GatewayState>, permissive_cors: bool) -> Router {
    let router = Router::new()
        .fallback(dispatch)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if permissive_cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

async fn dispatch(State(state): State<Arc<GatewayState>>, request: Request) -> Response {
    let path = request.uri().path();

    if path == state.relay_path && is_websocket_upgrade(request.headers()) {
        return upgrade_relay(state, request).await;
    }
    if state.proxy.matches(path) {
        return state.proxy.route(request).await;
    }
    state.assets.serve(request).await
}

async fn upgrade_relay(state: Arc<GatewayState>, request: Request) -> Response {
    let addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let (mut parts, _body) = request.into_parts();

    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            debug!("Rejected relay upgrade: {}", rejection);
            return rejection.into_response();
        }
    };

    let connection = ClientConnection {
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        addr,
    };
    let tracker = state.tracker.clone();

    upgrade
        .max_message_size(state.max_message_size)
        .max_frame_size(state.max_message_size)
        .on_failed_upgrade(|e| warn!("Relay upgrade failed: {}", e))
        .on_upgrade(move |socket| {
            tracker.track_future(async move {
                if let Err(e) = serve_client(
                    socket,
                    connection,
                    &state.connector,
                    &state.registry,
                    state.relay,
                )
                .await
                {
                    debug!("Relay session ended without pairing: {}", e);
                }
            })
        })
}

/// A bound gateway, ready to serve
pub struct Gateway {
    listener: TcpListener,
    local_addr: SocketAddr,
    state: Arc<GatewayState>,
    router: Router,
    shutdown_grace: Duration,
}

impl Gateway {
    /// Bind the listen socket and prepare the dispatcher
    pub async fn bind(config: Config) -> Result<Self> {
        let state = Arc::new(GatewayState::new(&config)?);

        let listener = TcpListener::bind(&config.listen)
            .await
            .with_context(|| format!("failed to bind {}", config.listen))?;
        let local_addr = listener.local_addr()?;

        info!("Gateway listening on {}", local_addr);
        info!("Hub: {}", config.hub_url);
        for route in config.routes.routes() {
            info!("Proxy route: {} -> {}", route.prefix, route.target);
        }
        info!("Relay: {} -> {}{}", config.relay_path, config.hub_url, config.hub_relay_path);
        state.assets.check();

        let router = build_router(state.clone(), config.permissive_cors);

        Ok(Self {
            listener,
            local_addr,
            state,
            router,
            shutdown_grace: config.shutdown_grace,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &SessionRegistry {
        self.state.registry()
    }

    /// Serve until `shutdown` resolves, then close every session and exit
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Gateway {
            listener,
            state,
            router,
            shutdown_grace,
            ..
        } = self;

        let stop_accepting = CancellationToken::new();
        let stopped = stop_accepting.clone();
        let mut server = tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { stopped.cancelled().await })
            .await
        });

        tokio::select! {
            _ = shutdown => info!("Shutting down gateway..."),
            result = &mut server => {
                state.registry.close_all();
                return match result {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(e).context("gateway server failed"),
                    Err(e) => Err(e).context("gateway server task panicked"),
                };
            }
        }

        stop_accepting.cancel();
        if !state.registry.is_empty() {
            match serde_json::to_string(&state.registry.snapshot()) {
                Ok(sessions) => debug!("Open sessions at shutdown: {}", sessions),
                Err(e) => debug!("Failed to serialize session snapshot: {}", e),
            }
        }
        state.registry.close_all();
        state.tracker.close();

        if tokio::time::timeout(shutdown_grace, state.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                "{} relay session(s) still open after {:?}",
                state.registry.len(),
                shutdown_grace
            );
        }

        match tokio::time::timeout(shutdown_grace, server).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => error!("Gateway server failed during shutdown: {}", e),
            Ok(Err(e)) => error!("Gateway server task failed: {}", e),
            Err(_) => warn!("In-flight requests still running after {:?}", shutdown_grace),
        }

        info!("Gateway stopped");
        Ok(())
    }
}

/// Resolves on Ctrl-C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received terminate signal"),
    }
}
