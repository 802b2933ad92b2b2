//! usb-host monitor
//!
//! Watches the USB topology of this machine and logs every device attach and
//! detach until interrupted.

use anyhow::{Context, Result, anyhow};
use async_channel::Receiver;
use clap::Parser;
use common::{TopologyEvent, setup_logging_with};
use host::config::{HostConfig, parse_duration};
use host::usb::{RusbHostController, UsbServices};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "usb-host-monitor")]
#[command(author, version, about = "Log USB device attach and detach events")]
#[command(long_about = "
Scans the USB host controllers of this machine and logs every device that
attaches to or detaches from a hub port.

EXAMPLES:
    # Run with default config
    usb-host-monitor

    # Scan once, log what is attached and exit
    usb-host-monitor --once

    # Scan every 250 milliseconds with debug logging
    usb-host-monitor --interval 250ms --log-level debug

CONFIGURATION:
    The monitor looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usb-host/host.toml
    3. /etc/usb-host/host.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Run a single scan and exit
    #[arg(long)]
    once: bool,

    /// Scan interval override (e.g. "500ms", "2s", "0" to disable)
    #[arg(short, long, value_name = "DURATION", value_parser = parse_interval)]
    interval: Option<Duration>,
}

fn parse_interval(s: &str) -> std::result::Result<Duration, String> {
    parse_duration(s)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = HostConfig::default();
        let path = HostConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(ref path) = args.config {
        HostConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        HostConfig::load_or_default()
    };

    if let Some(interval) = args.interval {
        config.scanner.interval = interval;
    }

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.logging.level);
    setup_logging_with(log_level, config.logging.format).context("Failed to setup logging")?;

    info!("usb-host monitor v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let host = RusbHostController::new()
        .map_err(|e| anyhow!("Failed to initialize libusb: {}", e))?;
    let services = UsbServices::new(Arc::new(host), config.service_settings());
    let events = services.subscribe();

    if args.once {
        let report = services
            .scan()
            .map_err(|e| anyhow!("Topology scan failed: {}", e))?;
        while let Ok(event) = events.try_recv() {
            log_event(&event);
        }
        info!(
            "{} device(s) attached, {} skipped",
            report.attached.len(),
            report.skipped
        );
        return Ok(());
    }

    let logger = tokio::spawn(log_events(events));

    services.start().context("Failed to start USB services")?;
    signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Shutting down...");
    services.stop();
    drop(services);

    if let Err(e) = logger.await {
        error!("Event logger task failed: {}", e);
    }
    Ok(())
}

async fn log_events(events: Receiver<TopologyEvent>) {
    while let Ok(event) = events.recv().await {
        log_event(&event);
    }
}

fn log_event(event: &TopologyEvent) {
    match event {
        TopologyEvent::Attached {
            identity,
            kind,
            parent,
            port,
        } => info!(
            "Attached {} ({:?}) on port {} of {}",
            identity,
            kind,
            port,
            parent.map_or_else(|| "root".to_string(), |p| p.to_string())
        ),
        TopologyEvent::Detached {
            identity,
            kind,
            parent,
            port,
        } => info!(
            "Detached {} ({:?}) from port {} of {}",
            identity,
            kind,
            port,
            parent.map_or_else(|| "root".to_string(), |p| p.to_string())
        ),
    }
}
