//! Presentation Layer
//!
//! HTTP routes and WebSocket connection handling.

pub mod http;
pub mod middleware;
pub mod websocket;
