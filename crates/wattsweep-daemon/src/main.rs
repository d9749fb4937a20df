//! wattsweep daemon - main entry point
//!
//! Discovers power meters on the configured subnet, polls them, and serves
//! the latest readings on a Prometheus endpoint.

mod api;
mod config;
mod server;
mod state;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "wattsweep")]
#[command(about = "Power meter discovery and Prometheus exporter")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "wattsweep.toml")]
    config: PathBuf,

    /// Bind address for the web server (overrides HTTP_PORT)
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Run a single discovery sweep and exit
    #[arg(long)]
    scan_once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("wattsweep v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration, environment variables win over the file
    let config = config::load(&args.config, |key| std::env::var(key).ok())?;

    let bind = match args.bind {
        Some(bind) => bind,
        None => config.listen_address()?,
    };

    info!(
        range = %config.discovery.network_range,
        discovery_interval = %config.discovery.discovery_interval,
        metrics_interval = %config.discovery.metrics_interval,
        device_port = config.device.port,
        "Configuration loaded"
    );

    let state = state::AppState::new(config)?;

    if args.scan_once {
        info!("Running single discovery sweep");
        let devices = state.engine.sweep().await;
        println!("Discovered {} devices:", devices.len());
        for device in devices {
            println!(
                "  - {} ({}) at {}",
                device.name, device.id, device.ip
            );
            println!("    Type: {}", device.device_type);
        }
    } else {
        server::run(state, &bind).await?;
    }

    Ok(())
}
