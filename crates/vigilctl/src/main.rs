//! Vigil Control - CLI client for the Vigil daemon
//!
//! Talks to vigild over its HTTP API.

mod client;
mod commands;
mod display;

use anyhow::Result;
use clap::{Parser, Subcommand};
use client::VigilClient;
use commands::RecommendArgs;
use std::time::Duration;
use vigil_common::{DEFAULT_URL, VERSION};

#[derive(Parser)]
#[command(name = "vigilctl")]
#[command(about = "Vigil - dependency health and recommendations", long_about = None)]
#[command(version = VERSION)]
struct Cli {
    /// Base URL of vigild
    #[arg(long, global = true, env = "VIGIL_URL", default_value = DEFAULT_URL)]
    url: String,

    /// Request timeout in seconds
    #[arg(long, global = true, default_value_t = 10)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the health summary (exit code 2 when unhealthy)
    Status,

    /// Show the detailed health report
    Health {
        /// Print the raw JSON report
        #[arg(long)]
        json: bool,
    },

    /// Request recommendations for a user
    Recommend {
        /// User identifier
        #[arg(long)]
        user: String,

        /// Extra context as a JSON object
        #[arg(long)]
        context: Option<String>,

        /// Minimum confidence (0.0 - 1.0)
        #[arg(long, default_value_t = 0.0)]
        min_confidence: f64,

        /// Maximum number of recommendations (1 - 100)
        #[arg(long)]
        max_results: Option<usize>,

        /// Print the raw JSON result
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = VigilClient::new(&cli.url, Duration::from_secs(cli.timeout))?;

    let code = match cli.command {
        Commands::Status => commands::status(&client).await?,
        Commands::Health { json } => commands::health(&client, json).await?,
        Commands::Recommend {
            user,
            context,
            min_confidence,
            max_results,
            json,
        } => {
            commands::recommend(
                &client,
                RecommendArgs {
                    user,
                    context,
                    min_confidence,
                    max_results,
                    json,
                },
            )
            .await?
        }
    };

    if code != commands::EXIT_OK {
        std::process::exit(code);
    }
    Ok(())
}
