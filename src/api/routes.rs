//! Relay route definitions

use axum::routing::get;
use axum::Router;

use super::handlers;
use super::server::AppState;
use super::websocket;

/// Create the relay router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Peers connect to the bare root URL
        .route("/", get(websocket::relay::relay_ws))
        .route("/ws", get(websocket::relay::relay_ws))
        .route("/health", get(handlers::health::health_check))
        .route("/api/status", get(handlers::health::status))
        .with_state(state)
}
