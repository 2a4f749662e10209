//! husky-gateway binary.

use anyhow::Context as _;
use clap::Parser;
use husky_gateway::{GatewayConfig, GatewayServer};
use std::path::PathBuf;
use tracing::info;

/// husky-gateway: client/backend message gateway
#[derive(Parser, Debug)]
#[command(name = "husky-gateway", version, about = "Client/backend message gateway")]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "~/.husky/gateway.toml")]
    config: String,

    /// Client-facing listen address (overrides config)
    #[arg(long)]
    client_addr: Option<String>,

    /// Server-facing listen address (overrides config)
    #[arg(long)]
    server_addr: Option<String>,

    /// Track per-message dispatch cost and call rate
    #[arg(long)]
    telemetry: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting husky-gateway");

    let config_path = PathBuf::from(&cli.config);
    let config = GatewayConfig::load(
        Some(&config_path),
        cli.client_addr.as_deref(),
        cli.server_addr.as_deref(),
        cli.telemetry,
    )
    .context("failed to load config")?;

    let server = GatewayServer::new(config);
    let running = server.start().await.context("failed to start listeners")?;

    shutdown_signal().await?;
    info!("received shutdown signal");
    server.shutdown();
    running.join().await;

    info!("husky-gateway stopped");
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() -> anyhow::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .context("failed to install SIGTERM handler")?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.context("failed to listen for Ctrl+C")?;
    }

    Ok(())
}
