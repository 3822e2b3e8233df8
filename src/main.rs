//! Fanout Relay - Entry Point
//!
//! Starts every configured relay instance with graceful shutdown support.

use futures::future::join_all;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fanout::api::RelayServer;
use fanout::config::{Config, LogConfig, LogFormat};
use fanout::error;

#[tokio::main]
async fn main() -> error::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    init_tracing(&config.log);
    info!("Starting Fanout relay");

    // Bind every listener up front so a taken port fails startup
    let mut servers = Vec::with_capacity(config.relays.len());
    for relay in &config.relays {
        let server = RelayServer::new(relay.clone(), config.connection);
        let listener = server.bind().await?;
        info!(
            "Relay {} bound to {} ({}, sender {})",
            relay.name(),
            relay.addr(),
            relay.payload_mode,
            relay.sender_policy.as_str()
        );
        servers.push((server, listener));
    }

    // Create shutdown channel
    let (shutdown_tx, _) = watch::channel(false);

    let tasks: Vec<_> = servers
        .into_iter()
        .map(|(server, listener)| {
            let shutdown = shutdown_tx.subscribe();
            tokio::spawn(async move {
                if let Err(e) = server.serve(listener, shutdown).await {
                    error!("Relay {} error: {}", server.name(), e);
                }
            })
        })
        .collect();

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    join_all(tasks).await;

    info!("Fanout relay stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| log.default_filter().into());
    let registry = tracing_subscriber::registry().with(filter);

    match log.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
