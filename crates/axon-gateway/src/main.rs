//! Axon Gateway — resilient RPC proxy + real-time event distribution

use axon_core::config::{AxonConfig, BindMode};
use axon_gateway::start_gateway;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "axon",
    about = "Axon — resilient engine RPC and WebSocket event fan-out"
)]
struct Cli {
    /// JSON config file; CLI flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    port: Option<u16>,

    /// "loopback" or "lan"
    #[arg(short, long)]
    bind: Option<String>,

    /// Base URL of the upstream engine RPC endpoint
    #[arg(long)]
    engine_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "axon=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &cli.config {
        Some(path) => AxonConfig::load(path)?,
        None => AxonConfig::default(),
    };
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }
    if let Some(bind) = cli.bind {
        config.gateway.bind = match bind.as_str() {
            "loopback" | "localhost" | "127.0.0.1" => BindMode::Loopback,
            _ => BindMode::Lan,
        };
    }
    if let Some(url) = cli.engine_url {
        config.gateway.engine_url = url;
    }

    start_gateway(config).await
}
