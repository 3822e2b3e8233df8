//! Relay server implementation
//!
//! Provides the WebSocket relay endpoint and HTTP health/status endpoints.

pub mod handlers;
pub mod routes;
pub mod server;
pub mod websocket;

pub use server::{AppState, RelayServer};
