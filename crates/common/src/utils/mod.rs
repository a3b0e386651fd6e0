mod headers;
mod id;
mod upstream_url;

pub use headers::{is_websocket_upgrade, strip_hop_by_hop};
pub use id::{generate_request_id, generate_session_id};
pub use upstream_url::{websocket_base, websocket_url};
