// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lazyscope::config::Config;
use lazyscope::sync::Manager;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting lazyscope");

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Configuration loaded: cluster={}, control_plane_namespace={}, cluster_domain={}",
        config.cluster_name, config.control_plane_namespace, config.cluster_domain
    );

    // Without the home cluster there is nothing to aggregate into
    let client = Client::try_default()
        .await
        .context("Failed to create a client for the home cluster")?;
    info!("Connected to Kubernetes cluster");

    let manager = Manager::new(client, config);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown signal received");
        shutdown.cancel();
    });

    manager.run(cancel).await
}
