//! Venue dashboard gateway
//!
//! Serves the compiled dashboard, forwards REST calls under a prefix to the
//! hub, and relays one WebSocket per browser to the hub's real-time endpoint.

pub mod assets;
pub mod config;
pub mod error_handling;
pub mod proxy;
pub mod registry;
pub mod relay;
pub mod server;
pub mod upstream;

#[cfg(test)]
mod tests;

pub use config::{Args, Config};
pub use registry::{SessionHandle, SessionRegistry};
pub use server::{Gateway, shutdown_signal};
