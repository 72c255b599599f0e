//! API Hub - Main Entry Point

use anyhow::{Context, Result};
use apihub_daemon::{logging, AppConfig, Node};
use clap::Parser;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::info;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "apihub")]
#[command(about = "API documentation hub server", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, env = "APIHUB_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Configuration
    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    // 2. Logging
    let (log_level, _log_guard) = logging::init(&config.log)?;
    info!("API Hub v{} starting...", VERSION);

    // 3. Listener
    let listener = TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.listen_addr))?;

    // 4. Node
    let node = Node::start(&config, listener, Some(log_level)).await?;
    info!(addr = %node.local_addr(), "System ready. Press Ctrl+C to shutdown");

    // 5. Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received. Exiting gracefully...");

    // 6. Graceful shutdown
    node.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
