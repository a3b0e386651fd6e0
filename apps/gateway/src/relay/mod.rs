//! WebSocket relay between browsers and the hub

mod frame;
mod session;

pub use frame::{CloseReason, Frame, Payload, WireMessage};
pub use session::{ClientConnection, RelaySession, RelaySettings, Termination, serve_client};
