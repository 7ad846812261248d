//! Zenoh bridge for Modbus field devices.
//!
//! Polls every configured bus, publishes readings to Zenoh and serves
//! labeled write requests.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use zenoh_bridge_fieldbus::FieldbusModule;
use zenoh_bridge_fieldbus::bridge::Bridge;
use zenoh_bridge_fieldbus::config::FieldbusBridgeConfig;

/// Zenoh bridge for Modbus field devices (TCP/RTU).
#[derive(Parser, Debug)]
#[command(name = "zenoh-bridge-fieldbus")]
#[command(about = "Polls and commands Modbus buses over Zenoh")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = "fieldbus.json5")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = FieldbusBridgeConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    // Initialize logging
    let log_config = config
        .logging
        .with_level_override(args.log_level.as_deref());
    fieldbus_common::init_tracing(&log_config)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!("Starting zenoh-bridge-fieldbus");
    info!("Loaded configuration from {:?}", args.config);

    // Connect to Zenoh
    let session = fieldbus_common::connect(&config.zenoh)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to Zenoh: {}", e))?;

    // Connect buses
    let development = config.fieldbus.development.is_some();
    if development {
        info!("Development mode: readings come from the fixture file");
    }
    let module = Arc::new(FieldbusModule::modbus(
        config.fieldbus.buses.clone(),
        development,
    ));
    module.init().await;

    let bridge = Arc::new(Bridge::new(session.clone(), module.clone(), &config.fieldbus));

    let poller = tokio::spawn(bridge.clone().run_poller());
    let writer = {
        let bridge = bridge.clone();
        tokio::spawn(async move {
            if let Err(e) = bridge.run_writer().await {
                error!("Write listener stopped: {}", e);
            }
        })
    };

    info!(
        "Fieldbus bridge running with {} bus(es)",
        config.fieldbus.buses.len()
    );
    bridge.publish_status("running").await;

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    poller.abort();
    writer.abort();

    bridge.publish_status("offline").await;
    module.close().await;

    session
        .close()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to close Zenoh session: {}", e))?;
    info!("Fieldbus bridge stopped");

    Ok(())
}
