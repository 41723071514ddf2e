//! Screenlink registry - standalone discovery service.
//!
//! Hosts a registry that answers ExchangeVersion, RegisterService and
//! Discover for any number of sessions, until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use screenlink::{DiscoveryService, ServiceConfig};
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "screenlink-rpc")]
#[command(about = "Discovery registry for screenlink services")]
struct Args {
    /// URL to serve on, e.g. unix:///tmp/registry.sock or tcp+tv://127.0.0.1
    /// (no port = auto-assign)
    #[arg(short, long, default_value = "tcp+tv://127.0.0.1")]
    location: String,

    /// Communication version answered to ExchangeVersion
    #[arg(long = "version", default_value = ServiceConfig::COMMUNICATION_VERSION)]
    protocol_version: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --debug when set
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting screenlink registry (version {})", args.protocol_version);

    let mut registry = DiscoveryService::new(args.protocol_version);
    let location = registry
        .start(&args.location)
        .await
        .with_context(|| format!("failed to start registry on {}", args.location))?;

    // Read by whoever launched us
    println!("REGISTRY_LOCATION={}", location);

    info!("Registry running on {}", location);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");

    info!(
        "Stopping registry with {} known session(s)",
        registry.table().sessions().len()
    );
    registry.stop();

    Ok(())
}
