//! rntbd-mock - RNTBD mock server
//!
//! A TCP server that speaks just enough RNTBD to negotiate a connection
//! context and answer document reads with a canned fixture.

use rntbd_server::{Config, Server};
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

    // Load configuration (from file if RNTBD_CONFIG is set, then env overrides)
    let config_path = std::env::var("RNTBD_CONFIG").ok();
    let config = match Config::load() {
        Ok(c) => {
            if let Some(path) = &config_path {
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
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    tracing::info!("Starting RNTBD mock server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Max connections: {}", config.network.max_connections);
    tracing::info!("  Max frame size: {} bytes", config.protocol.max_frame_size);
    tracing::info!("  Handshake policy: {}", config.protocol.handshake);
    tracing::info!(
        "  Server agent: {} {}",
        config.protocol.server_agent,
        config.protocol.server_version
    );
    match &config.fixture.document_path {
        Some(path) => tracing::info!("  Document fixture: {}", path.display()),
        None => tracing::info!("  Document fixture: built-in"),
    }

    if let Err(e) = config.tls.validate() {
        tracing::error!("TLS configuration error: {}", e);
        return Err(e.into());
    }
    if config.tls.enabled {
        tracing::info!("  TLS: enabled");
        if config.tls.require_client_cert {
            tracing::info!("  mTLS: enabled (client certificate required)");
        }
    } else {
        tracing::info!("  TLS: disabled");
    }

    let server = Arc::new(Server::from_config(&config)?);

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
        connections = stats.connections_total.load(Ordering::Relaxed),
        requests = stats.requests_total.load(Ordering::Relaxed),
        errors = stats.errors_total.load(Ordering::Relaxed),
        "Server stopped"
    );
    Ok(())
}
