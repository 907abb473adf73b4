use anyhow::Result;
use clap::Parser;
use std::path::Path;
use tokio::signal;
use tracing::{error, info, warn};

use topo_discovery::config::Config;
use topo_discovery::TopologyDiscoverer;

#[derive(Parser)]
#[command(name = "topo-discovery")]
#[command(about = "Watches a TiDB cluster and prints its live topology")]
struct Args {
    #[arg(short, long, default_value = "config/config.toml")]
    config: String,

    /// Override the configured PD endpoints (repeatable)
    #[arg(long)]
    pd_endpoints: Vec<String>,

    #[arg(short, long)]
    verbose: bool,
}

/// Read the config file when it exists, then apply command line overrides.
/// Also returns where the configuration came from, for logging once tracing
/// is up.
async fn load_config(args: &Args) -> Result<(Config, String)> {
    let (mut config, origin) = if Path::new(&args.config).exists() {
        let config = Config::from_file_with_env(&args.config).await?;
        (config, args.config.clone())
    } else {
        (Config::default(), "built-in defaults".to_string())
    };

    if !args.pd_endpoints.is_empty() {
        config.pd.endpoints = args.pd_endpoints.clone();
    }
    config.validate()?;
    Ok((config, origin))
}

fn log_loaded_config(config: &Config, origin: &str) {
    info!(
        origin = %origin,
        pd_endpoints = ?config.pd.endpoints,
        refresh_interval = config.discovery.refresh_interval,
        tls = config.security.is_tls_enabled(),
        "Loaded configuration"
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let (config, origin) = load_config(&args).await?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(config.log.env_filter(args.verbose))
        .init();

    log_loaded_config(&config, &origin);
    info!("Starting topo-discovery");

    let discoverer = TopologyDiscoverer::new(&config).await?;
    let mut updates = discoverer.subscribe();
    discoverer.start()?;

    let shutdown_signal = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for CTRL+C: {}", e);
        }
        warn!("Received CTRL+C, shutting down...");
    };
    tokio::pin!(shutdown_signal);

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => break,
            update = updates.recv() => {
                let Some(snapshot) = update else { break };
                info!(count = snapshot.len(), "topology updated");
                for component in snapshot.iter() {
                    info!("  {}", component);
                }
            }
        }
    }

    if let Err(e) = discoverer.close().await {
        error!("Failed to close topology discoverer: {}", e);
    }
    info!("topo-discovery shutdown complete");
    Ok(())
}
