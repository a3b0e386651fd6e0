//! Process configuration
//!
//! Every knob is a command-line flag with an environment fallback, so the
//! gateway can be repointed at another hub or port without code changes.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;
use venue_gateway_common::constants::{
    CLOSE_TIMEOUT_MS, CONNECT_TIMEOUT_SECS, DEFAULT_API_PREFIX, DEFAULT_HUB_RELAY_PATH,
    DEFAULT_HUB_URL, DEFAULT_LISTEN_PORT, DEFAULT_RELAY_PATH, DEFAULT_STATIC_DIR,
    IDLE_TIMEOUT_SECS, MAX_BODY_SIZE_BYTES, MAX_MESSAGE_SIZE_BYTES, REQUEST_TIMEOUT_SECS,
    SHUTDOWN_GRACE_SECS,
};
use venue_gateway_common::validation::validate_relay_path;
use venue_gateway_common::{ProxyRoute, RouteTable, RoutesFile, websocket_base};

/// CLI arguments for the gateway
#[derive(Parser, Debug, Clone)]
#[command(name = "venue-gateway")]
#[command(about = "Dashboard front door: static UI, REST proxy and WebSocket relay to the hub", long_about = None)]
#[command(version)]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "GATEWAY_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_LISTEN_PORT)]
    pub port: u16,

    /// Base address of the hub service
    #[arg(long, env = "HUB_URL", default_value = DEFAULT_HUB_URL)]
    pub hub_url: String,

    /// Path prefix forwarded to the hub with the prefix removed
    #[arg(long, env = "GATEWAY_API_PREFIX", default_value = DEFAULT_API_PREFIX)]
    pub api_prefix: String,

    /// Path browsers open the real-time socket on
    #[arg(long, env = "GATEWAY_RELAY_PATH", default_value = DEFAULT_RELAY_PATH)]
    pub relay_path: String,

    /// Real-time endpoint path on the hub
    #[arg(long, env = "GATEWAY_HUB_RELAY_PATH", default_value = DEFAULT_HUB_RELAY_PATH)]
    pub hub_relay_path: String,

    /// Directory with the compiled dashboard
    #[arg(long, env = "GATEWAY_STATIC_DIR", default_value = DEFAULT_STATIC_DIR)]
    pub static_dir: PathBuf,

    /// JSON file with additional proxy routes
    #[arg(long, env = "GATEWAY_ROUTES_FILE")]
    pub routes_file: Option<PathBuf>,

    /// Upstream connect timeout in seconds
    #[arg(long, env = "GATEWAY_CONNECT_TIMEOUT", default_value_t = CONNECT_TIMEOUT_SECS)]
    pub connect_timeout: u64,

    /// Upstream REST response timeout in seconds
    #[arg(long, env = "GATEWAY_REQUEST_TIMEOUT", default_value_t = REQUEST_TIMEOUT_SECS)]
    pub request_timeout: u64,

    /// Close relay sessions idle for this many seconds (0 disables)
    #[arg(long, env = "GATEWAY_IDLE_TIMEOUT", default_value_t = IDLE_TIMEOUT_SECS)]
    pub idle_timeout: u64,

    /// Largest WebSocket message accepted on either leg, in bytes
    #[arg(long, env = "GATEWAY_MAX_MESSAGE_SIZE", default_value_t = MAX_MESSAGE_SIZE_BYTES)]
    pub max_message_size: usize,

    /// Largest REST request body forwarded, in bytes
    #[arg(long, env = "GATEWAY_MAX_BODY_SIZE", default_value_t = MAX_BODY_SIZE_BYTES)]
    pub max_body_size: usize,

    /// Seconds to wait for relay sessions to close on shutdown
    #[arg(long, env = "GATEWAY_SHUTDOWN_GRACE", default_value_t = SHUTDOWN_GRACE_SECS)]
    pub shutdown_grace: u64,

    /// Answer CORS preflights and add permissive CORS headers
    #[arg(long, env = "GATEWAY_PERMISSIVE_CORS")]
    pub permissive_cors: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Resolved gateway configuration, fixed for the life of the process
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (`host:port`)
    pub listen: String,

    /// Hub base address
    pub hub_url: Url,

    /// Client-facing relay path
    pub relay_path: String,

    /// Hub relay path
    pub hub_relay_path: String,

    /// Asset root
    pub static_dir: PathBuf,

    /// REST proxy routes
    pub routes: RouteTable,

    pub connect_timeout: Duration,

    pub request_timeout: Duration,

    /// `None` keeps idle sessions open indefinitely
    pub idle_timeout: Option<Duration>,

    /// Bound on each close frame sent during teardown
    pub close_timeout: Duration,

    pub shutdown_grace: Duration,

    pub max_message_size: usize,

    pub max_body_size: usize,

    pub permissive_cors: bool,
}

impl Config {
    /// Default configuration for a hub, listening on an ephemeral local port
    pub fn new(hub_url: Url, static_dir: impl Into<PathBuf>) -> Result<Self> {
        websocket_base(&hub_url).context("hub URL cannot carry WebSocket traffic")?;
        let api_route = ProxyRoute::new(DEFAULT_API_PREFIX, hub_url.clone(), true)?;

        Ok(Self {
            listen: "127.0.0.1:0".to_string(),
            hub_url,
            relay_path: DEFAULT_RELAY_PATH.to_string(),
            hub_relay_path: DEFAULT_HUB_RELAY_PATH.to_string(),
            static_dir: static_dir.into(),
            routes: RouteTable::new(vec![api_route])?,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            idle_timeout: None,
            close_timeout: Duration::from_millis(CLOSE_TIMEOUT_MS),
            shutdown_grace: Duration::from_secs(SHUTDOWN_GRACE_SECS),
            max_message_size: MAX_MESSAGE_SIZE_BYTES,
            max_body_size: MAX_BODY_SIZE_BYTES,
            permissive_cors: false,
        })
    }

    pub fn from_args(args: Args) -> Result<Self> {
        let hub_url = Url::parse(&args.hub_url)
            .with_context(|| format!("invalid hub URL '{}'", args.hub_url))?;
        if !matches!(hub_url.scheme(), "http" | "https") {
            bail!(
                "hub URL must use http or https, got '{}'",
                hub_url.scheme()
            );
        }
        if args.connect_timeout == 0 || args.request_timeout == 0 {
            bail!("upstream timeouts must be at least one second");
        }
        if args.max_message_size == 0 || args.max_body_size == 0 {
            bail!("size limits must be greater than zero");
        }

        let relay_path = validate_relay_path(&args.relay_path)
            .with_context(|| format!("invalid relay path '{}'", args.relay_path))?;
        let hub_relay_path = validate_relay_path(&args.hub_relay_path)
            .with_context(|| format!("invalid hub relay path '{}'", args.hub_relay_path))?;

        let mut routes = vec![ProxyRoute::new(&args.api_prefix, hub_url.clone(), true)?];
        if let Some(path) = &args.routes_file {
            routes.extend(load_routes_file(path)?);
        }

        Ok(Self {
            listen: format!("{}:{}", args.host, args.port),
            hub_url,
            relay_path,
            hub_relay_path,
            static_dir: args.static_dir,
            routes: RouteTable::new(routes)?,
            connect_timeout: Duration::from_secs(args.connect_timeout),
            request_timeout: Duration::from_secs(args.request_timeout),
            idle_timeout: (args.idle_timeout > 0).then(|| Duration::from_secs(args.idle_timeout)),
            close_timeout: Duration::from_millis(CLOSE_TIMEOUT_MS),
            shutdown_grace: Duration::from_secs(args.shutdown_grace),
            max_message_size: args.max_message_size,
            max_body_size: args.max_body_size,
            permissive_cors: args.permissive_cors,
        })
    }
}

/// Read extra routes, re-validating each entry
fn load_routes_file(path: &Path) -> Result<Vec<ProxyRoute>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read routes file '{}'", path.display()))?;
    let file = RoutesFile::from_json(&json)
        .with_context(|| format!("failed to parse routes file '{}'", path.display()))?;

    file.routes
        .into_iter()
        .map(|route| {
            ProxyRoute::new(&route.prefix, route.target, route.strip_prefix).map_err(Into::into)
        })
        .collect()
}
