use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tolkien_server::{ServerConfig, env::SystemEnv, nats::connect, serve};

/// Token lease service over NATS KV.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file; environment variables override it
    #[arg(short, long, env = "TOLKIEN_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = ServerConfig::load(args.config.as_deref(), &SystemEnv)
        .context("Invalid configuration")?;
    let nats = connect(&config.nats)
        .await
        .context("Failed to connect to NATS")?;

    serve(config, nats)
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("Server failed")
}
