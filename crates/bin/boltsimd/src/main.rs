//! # boltsimd: bolt machine fleet simulator
//!
//! Composition root that wires the adapters together and runs the fleet.
//!
//! ## Responsibilities
//! - Parse configuration (config file, env vars)
//! - Initialize logging
//! - Construct the provisioning client and the MQTT transport (adapters)
//! - Plan one device actor per configured machine and start them
//! - Handle graceful shutdown (Ctrl-C): every device closes its session
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer: no domain logic belongs here.

mod config;
mod host;

use std::sync::Arc;

use anyhow::Context;
use boltsim_adapter_mqtt::MqttTransport;
use boltsim_adapter_provisioning_http::HttpProvisioner;
use boltsim_app::fleet::Fleet;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::host::SystemHost;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("loading configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.logging.filter))
        .init();
    tracing::debug!(?config, "configuration loaded");

    // Adapters
    let provisioner =
        HttpProvisioner::new(config.dps()).context("building provisioning client")?;
    let transport = MqttTransport::new(config.mqtt.clone());
    let host = SystemHost::detect();

    // Fleet
    let mut fleet = Fleet::new(
        &config.plant_specs(),
        &config.device_options(),
        Arc::new(provisioner),
        Arc::new(transport),
        Arc::new(host),
    );
    tracing::info!(devices = fleet.len(), "fleet planned");
    fleet.start();

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("shutdown requested");
    fleet.shutdown().await;

    Ok(())
}
