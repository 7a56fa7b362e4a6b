// SPDX-License-Identifier: MIT
//
// Polarlink — Klipper-to-cloud bridge daemon
//
// Entry point. Initialises logging, loads configuration and the device key,
// and runs the cloud connector until the process is signalled.

use std::path::PathBuf;

use tokio::sync::watch;

use polarlink_cloud::CloudService;
use polarlink_core::config::BridgeConfig;
use polarlink_core::error::Result;
use polarlink_identity::identity::DeviceIdentity;
use polarlink_identity::keys::DeviceKey;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("polarlink.toml"));

    let first_run = !config_path.exists();
    let config = BridgeConfig::load_or_create(&config_path)?;

    let default_level = if config.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    tracing::info!(config = %config_path.display(), "Polarlink starting");
    if first_run {
        tracing::info!(config = %config_path.display(), "config file not found, wrote defaults");
    }

    // Without a usable key the device can neither register nor
    // authenticate, so a key failure is fatal.
    let key = DeviceKey::load_or_generate(&config.paths.key_file)?;
    let identity = DeviceIdentity::detect(
        &config.manufacturer,
        &config.machine_type,
        &config.printer_type,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let service = CloudService::new(config, config_path, identity, key, shutdown_rx);
    service.run().await
}
