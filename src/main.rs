//! audiobridge - engine-side bridge server
//!
//! Accepts plugin clients on a loopback TCP port and applies their port,
//! sample rate, parameter and audio commands.

use audiobridge_server::{Config, Server, ServerConfig, TracingHandler};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if AUDIOBRIDGE_CONFIG is set, then env overrides)
    let config_path = std::env::var("AUDIOBRIDGE_CONFIG").ok();
    let config = match Config::load() {
        Ok(c) => {
            if let Some(ref path) = config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if config_path.is_some() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::warn!("Invalid environment configuration ({}), using defaults", e);
            Config::default()
        }
    };

    tracing::info!("Starting audiobridge server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Max connections: {}", config.network.max_connections);
    tracing::info!(
        "  Receive buffer: {} bytes, queue: {} bytes",
        config.protocol.recv_buffer_size,
        config.protocol.recv_queue_capacity
    );

    let server = Arc::new(Server::new(
        ServerConfig::from(&config),
        TracingHandler::factory(),
    ));

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    let stats = server.stats();
    tracing::info!(
        "Server stopped ({} connections, {} commands, {} protocol errors)",
        stats.connections_total.load(Ordering::Relaxed),
        stats.commands_total.load(Ordering::Relaxed),
        stats.protocol_errors.load(Ordering::Relaxed)
    );
    Ok(())
}
