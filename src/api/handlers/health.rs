//! Health and status endpoints

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::api::server::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "fanout",
            "relay": state.relay.name(),
        })),
    )
}

/// Relay status: configuration in effect and hub counters
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "relay": state.relay.name(),
        "port": state.relay.port,
        "payload_mode": state.relay.payload_mode,
        "sender_policy": state.relay.sender_policy,
        "idle_timeout_secs": state.connection.idle_timeout.map(|d| d.as_secs()),
        "ping_interval_secs": state.connection.ping_interval.map(|d| d.as_secs()),
        "started_at": state.started_at_utc,
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "stats": state.hub.stats(),
    }))
}
