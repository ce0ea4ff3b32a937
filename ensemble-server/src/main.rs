use anyhow::Result;
use clap::Parser;
use ensemble_cluster::{Coordinator, EnsembleConfig, MemoryStore, PartitionerRegistry};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "ensemble-server")]
#[command(about = "Ensemble key/value store node")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "ensemble.toml")]
    config: String,

    /// Host to bind to, overrides cluster.bind_host
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on, overrides cluster.bind_port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,ensemble_cluster=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    // Load config
    let path = Path::new(&args.config);
    let mut config = if path.exists() {
        tracing::info!("Config file: {}", args.config);
        EnsembleConfig::load(path)?
    } else {
        tracing::warn!("Config file {} not found, using defaults", args.config);
        EnsembleConfig::default()
    };
    if let Some(host) = args.host {
        config.cluster.bind_host = host;
    }
    if let Some(port) = args.port {
        config.cluster.bind_port = port;
    }

    tracing::info!(
        "Starting ensemble node {} of cluster {} on {}:{}",
        config.cluster.node_name,
        config.cluster.name,
        config.cluster.bind_host,
        config.cluster.bind_port
    );

    let store = Arc::new(MemoryStore::new());
    let coordinator = Coordinator::start(config, store, &PartitionerRegistry::new()).await?;

    tracing::info!("Listening on {}", coordinator.local_addr());

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    coordinator.shutdown().await;

    Ok(())
}
