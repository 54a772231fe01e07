//! perpdesk entry point.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Binance futures trading gateway and watch client
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via PERPDESK_CONFIG env var)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Run the gateway (default)
    Serve,
    /// Follow a running gateway from the terminal
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before any TLS connection is made
    perpdesk_ws::init_crypto();

    let args = Args::parse();
    perpdesk_telemetry::init_logging()?;

    info!("Starting perpdesk v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > PERPDESK_CONFIG > default
    let config_path = args
        .config
        .or_else(|| std::env::var("PERPDESK_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");
    let config = perpdesk_app::AppConfig::load(&config_path)?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            info!(
                listen = %config.gateway.bind_addr(),
                rest_url = %config.exchange.rest_url,
                "Configuration loaded"
            );
            perpdesk_app::Application::new(config).run().await?;
        }
        Command::Watch => {
            info!(socket_url = %config.watch.socket_url, "Configuration loaded");
            perpdesk_app::run_watch(config, CancellationToken::new()).await?;
        }
    }

    Ok(())
}
