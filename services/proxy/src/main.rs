//! wsrelay
//!
//! WebSocket reverse proxy. Accepts WebSocket connections, dials the
//! configured target for each one and relays frames in both directions.

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wsrelay_proxy::{ProxyConfig, ProxyServer};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ProxyConfig::load().context("invalid proxy configuration")?;

    // Initialize tracing (prefer RUST_LOG, fallback to WSRELAY_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting wsrelay");
    info!(
        target_url = %config.target_url,
        listen_host = %config.listen_host,
        listen_port = config.listen_port,
        max_connections = config.max_connections,
        idle_timeout_ms = config.idle_timeout_ms,
        reconnect_attempts = config.reconnect_attempts,
        "Configuration loaded"
    );

    let server = ProxyServer::new(config);
    let addr = server.start().await.context("failed to start proxy")?;
    info!(addr = %addr, "Listening for connections");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Received shutdown signal");

    server.stop().await;
    info!("wsrelay shutdown complete");
    Ok(())
}
