//! Relay server using Axum
//!
//! One server per relay instance: a WebSocket endpoint feeding the hub plus
//! health and status endpoints.

use std::net::SocketAddr;
use std::time::Instant;

use axum::Router;
use chrono::{DateTime, Utc};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::{ConnectionPolicy, RelayConfig};
use crate::error::{RelayError, Result};
use crate::hub::Hub;

use super::routes;

/// Shared state for relay handlers
#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub relay: RelayConfig,
    pub connection: ConnectionPolicy,
    pub started_at: Instant,
    pub started_at_utc: DateTime<Utc>,
}

/// Relay server
pub struct RelayServer {
    config: RelayConfig,
    state: AppState,
}

impl RelayServer {
    /// Create a new relay server with its own hub
    pub fn new(config: RelayConfig, connection: ConnectionPolicy) -> Self {
        let hub = Hub::new(config.hub_config());

        let state = AppState {
            hub,
            relay: config.clone(),
            connection,
            started_at: Instant::now(),
            started_at_utc: Utc::now(),
        };

        Self { config, state }
    }

    pub fn name(&self) -> &'static str {
        self.config.name()
    }

    pub fn hub(&self) -> &Hub {
        &self.state.hub
    }

    /// Build the router
    pub fn build_router(&self) -> Router {
        routes::create_router(self.state.clone()).layer(TraceLayer::new_for_http())
    }

    /// Bind the configured listen address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.addr();
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            RelayError::Internal(format!("{} relay failed to bind {}: {}", self.name(), addr, e))
        })?;
        Ok(listener)
    }

    /// Serve on an already bound listener until shutdown is signalled
    #[instrument(skip(self, listener, shutdown), fields(relay = self.name()))]
    pub async fn serve(&self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr = listener.local_addr()?;
        info!("WebSocket relay running on ws://{}", addr);

        axum::serve(
            listener,
            self.build_router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .map_err(|e| RelayError::Internal(e.to_string()))?;

        info!(
            connections = self.state.hub.connection_count(),
            "Relay server shut down"
        );
        Ok(())
    }
}
