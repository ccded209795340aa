//! HTTP Routes
//!
//! Health, metrics, and the WebSocket upgrade endpoint.

pub mod handlers;
pub mod routes;
