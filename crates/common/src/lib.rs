//! Common utilities and types for the venue gateway
//!
//! This crate provides the transport-agnostic pieces of the gateway: the error
//! taxonomy, the proxy route table, the relay session model, and the header and
//! URL helpers used when forwarding to the hub.

pub mod constants;
pub mod error;
pub mod models;
pub mod utils;
pub mod validation;

// Re-export commonly used types for convenience
pub use error::{GatewayError, Result};
pub use models::{
    Leg, ProxyRoute, ResolvedRoute, RouteTable, RoutesFile, SessionId, SessionInfo, SessionState,
};
pub use utils::{
    generate_request_id, generate_session_id, is_websocket_upgrade, strip_hop_by_hop,
    websocket_base, websocket_url,
};
