mod bridge;
mod command;
mod config;
mod discovery;
mod entities;
mod error;
mod listener;
mod mqtt;
mod mug;
mod reconciler;
mod tracker;

#[cfg(test)]
mod testing;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use bridge::{BridgeState, Supervisor};
use config::{Cli, Config};
use mqtt::RumqttcConnector;
use mug::ble::BleDriver;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ember_mqtt_bridge=debug")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli)?;

    tracing::info!("Starting ember-mqtt-bridge v{}", env!("CARGO_PKG_VERSION"));

    let driver = BleDriver::new(config.adapter.as_deref(), config.scan_duration).await?;
    let state = BridgeState::new(config.bridge, driver);
    for address in &config.mugs {
        state.known.record(address);
    }
    if !state.known.is_empty() {
        tracing::info!(mugs = ?state.known.snapshot(), "Seeded known mugs");
    }

    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received Ctrl-C, shutting down"),
            Err(e) => {
                tracing::error!(error = %e, "Cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        }
    };

    Supervisor::new(state, RumqttcConnector::new(config.broker))
        .run(shutdown)
        .await;
    Ok(())
}
