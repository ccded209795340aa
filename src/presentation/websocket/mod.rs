//! WebSocket Connection Handling
//!
//! Upgrade endpoint and per-connection event loop.

pub mod handler;

pub use handler::ws_handler;
