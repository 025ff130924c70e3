//! hwagent Daemon - Main entry point
//!
//! Sweeps the configured network range, classifies the devices it finds and
//! keeps connections to them until interrupted.

mod config;
mod observer;

use anyhow::{Context, Result};
use clap::Parser;
use hwagent_discovery::DiscoveryScanner;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::ENV_LOG_LEVEL;
use crate::observer::LogObserver;

#[derive(Parser, Debug)]
#[command(name = "hwagent")]
#[command(about = "Network hardware discovery and connection agent")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "hwagent.toml")]
    config: PathBuf,

    /// Range to scan in CIDR notation (overrides config and environment)
    #[arg(short, long)]
    range: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Run a single scan and exit
    #[arg(long)]
    scan_once: bool,

    /// Write the default configuration to the config path and exit
    #[arg(long)]
    write_config: bool,
}

fn parse_level(name: &str) -> Level {
    match name.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level_name = args
        .log_level
        .clone()
        .or_else(|| std::env::var(ENV_LOG_LEVEL).ok())
        .unwrap_or_else(|| "info".to_string());

    let subscriber = FmtSubscriber::builder()
        .with_max_level(parse_level(&level_name))
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("hwagent v{}", env!("CARGO_PKG_VERSION"));

    if args.write_config {
        config::save_default_config(&args.config)?;
        info!(path = %args.config.display(), "Wrote default configuration");
        return Ok(());
    }

    // Load configuration
    let mut config = config::load_config(&args.config)?;
    config.apply_env_overrides()?;

    // Override range if specified
    if let Some(range) = args.range {
        config.discovery.range = range;
    }

    let range = config.validate()?;
    info!(
        range = %range,
        hosts = range.host_count(),
        auto_connect = config.connection.auto_connect,
        "Configuration loaded"
    );

    let scanner = Arc::new(DiscoveryScanner::new(config.to_scanner_config()));
    scanner.set_observer(Arc::new(LogObserver));

    if args.scan_once {
        // Single scan mode
        info!("Running single discovery scan");
        let devices = scanner.scan_once().await?;
        println!("Discovered {} devices:", devices.len());
        for device in devices {
            println!(
                "  - {} ({}) at {}",
                device.display_name(),
                device.device_type,
                device.address
            );
            println!("    Ports: {:?}", device.open_ports);
            if let Some(mac) = &device.mac {
                println!("    MAC: {}", mac);
            }
            if let Some(manufacturer) = &device.manufacturer {
                println!("    Manufacturer: {}", manufacturer);
            }
        }
        scanner.stop().await;
        return Ok(());
    }

    // Daemon mode - scan until Ctrl-C
    info!(
        interval_secs = scanner.config().interval_secs,
        "Scanning continuously, press Ctrl-C to stop"
    );
    let runner = scanner.clone();
    let mut scan_task = tokio::spawn(async move { runner.start_continuous().await });

    tokio::select! {
        result = &mut scan_task => {
            result.context("Scan loop task failed")??;
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("Shutdown requested");
        }
    }

    scanner.stop().await;
    scan_task.await.context("Scan loop task failed")??;

    info!("hwagent stopped");
    Ok(())
}
