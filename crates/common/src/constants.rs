/// Default listen port for the gateway
pub const DEFAULT_LISTEN_PORT: u16 = 8080;

/// Default hub base address
pub const DEFAULT_HUB_URL: &str = "http://127.0.0.1:7000";

/// External path prefix forwarded to the hub with the prefix stripped
pub const DEFAULT_API_PREFIX: &str = "/api";

/// Path on which browsers open the real-time socket
pub const DEFAULT_RELAY_PATH: &str = "/ws";

/// Path of the hub's real-time endpoint
pub const DEFAULT_HUB_RELAY_PATH: &str = "/ws";

/// Directory holding the compiled dashboard
pub const DEFAULT_STATIC_DIR: &str = "ui/dist";

/// Document served for every path that is neither API nor asset
pub const SPA_ENTRY_DOCUMENT: &str = "index.html";

/// Upstream connect timeout (5 seconds)
pub const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Upstream REST response timeout (30 seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Relay idle timeout; zero disables it
pub const IDLE_TIMEOUT_SECS: u64 = 0;

/// Time allowed for sending a close frame to a leg during teardown
pub const CLOSE_TIMEOUT_MS: u64 = 1000;

/// Time allowed for relay sessions to finish after a shutdown signal
pub const SHUTDOWN_GRACE_SECS: u64 = 5;

/// Maximum WebSocket message and frame size (16 MB)
pub const MAX_MESSAGE_SIZE_BYTES: usize = 16 * 1024 * 1024;

/// Maximum buffered REST request body (10 MB)
pub const MAX_BODY_SIZE_BYTES: usize = 10 * 1024 * 1024;

/// WebSocket close code: normal closure
pub const CLOSE_NORMAL: u16 = 1000;

/// WebSocket close code: endpoint going away
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// WebSocket close code: protocol error
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;

/// WebSocket close code: message exceeds the size limit
pub const CLOSE_MESSAGE_TOO_BIG: u16 = 1009;

/// WebSocket close code: internal error (used for upstream unavailability)
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;
