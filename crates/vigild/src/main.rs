//! Vigil Daemon - dependency health and recommendation service

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vigild::{AppState, Config};

#[derive(Parser)]
#[command(name = "vigild")]
#[command(about = "Vigil - dependency health aggregation and recommendation orchestration", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file (default: /etc/vigil/config.toml)
    #[arg(short, long, env = "VIGIL_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listen address from the config
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (RUST_LOG, default info)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!("Vigil Daemon v{} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());

    let state = AppState::from_config(&config)?;
    if let Err(e) = vigild::server::run(state, &bind).await {
        error!("Server failed: {:#}", e);
        return Err(e);
    }

    info!("Shutting down gracefully");
    Ok(())
}
