//! CORS Middleware Configuration

use tower_http::cors::{Any, CorsLayer};

/// Create a permissive CORS layer.
///
/// The relay only exposes health, metrics, and the WebSocket upgrade;
/// origin policy for the API proper is enforced by the upstream service.
pub fn create_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}
