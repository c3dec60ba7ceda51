//! Daemon entry point: one control loop per configured device plus
//! the HTTP API, all torn down together on ctrl-c.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use solminer::api::{self, Registry};
use solminer::config::Config;
use solminer::engine::DeviceController;
use solminer::protocol::ProtocolClient;
use solminer::tracing::prelude::*;

const DEFAULT_CONFIG_PATH: &str = "/etc/solminer/config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    solminer::tracing::init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("SOLMINER_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)?;

    if config.devices.is_empty() {
        warn!(config = %config_path, "No devices configured; serving an empty API");
    }

    let cancellation = CancellationToken::new();
    let mut registry = Registry::new();
    let mut controllers = Vec::new();

    for endpoint in &config.devices {
        let id = endpoint.host.clone();
        let client = ProtocolClient::new(endpoint.clone());
        let (controller, handle) = DeviceController::new(
            id,
            endpoint.host.clone(),
            client,
            config.automation.clone(),
            config.policy.clone(),
        );
        registry.insert(handle);
        controllers.push(tokio::spawn(controller.run(cancellation.clone())));
    }

    let listener = tokio::net::TcpListener::bind(&config.api_listen)
        .await
        .with_context(|| format!("binding API listener on {}", config.api_listen))?;
    let server = tokio::spawn(api::serve(
        listener,
        Arc::new(registry),
        cancellation.clone(),
    ));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutting down");
    cancellation.cancel();

    for controller in controllers {
        if let Err(err) = controller.await {
            warn!(error = %err, "Controller task panicked");
        }
    }
    server.await.context("API server task")??;

    Ok(())
}
