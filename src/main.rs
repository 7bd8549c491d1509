//! # notifeed Main Entry Point

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use notifeed::{
    config::ConfigLoader,
    server::{build_state, run_server},
    telemetry::init_tracing,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Parser)]
#[command(name = "notifeed", version, about = "Merged notification feed")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Serve the feed over HTTP (default)
    Serve,
    /// Run one fetch round, print it as JSON and exit
    Fetch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration from layered env files and variables
    let config = ConfigLoader::new()
        .load()
        .context("failed to load configuration")?;
    init_tracing(&config).context("failed to initialize tracing")?;

    info!(profile = %config.profile, "Configuration loaded");
    if let Ok(redacted_json) = config.redacted_json() {
        debug!(config = %redacted_json, "Effective configuration");
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let shutdown = CancellationToken::new();
            let signal_token = shutdown.clone();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("Received Ctrl+C, initiating graceful shutdown");
                        signal_token.cancel();
                    }
                    Err(err) => warn!(error = %err, "Failed to listen for Ctrl+C"),
                }
            });

            run_server(config, shutdown).await?;
        }
        Command::Fetch => {
            let state = build_state(Arc::new(config)).await?;
            let notifications = state.manager.fetch_all().await;
            println!("{}", serde_json::to_string_pretty(&notifications)?);
        }
    }

    Ok(())
}
