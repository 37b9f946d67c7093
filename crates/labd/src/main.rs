//! labd - DevOps lab daemon
//!
//! Hosts a single lab session: the simulated cluster, the deployment
//! pipeline, chaos experiments and the telemetry loop, exposed over HTTP.

use anyhow::{Context, Result};
use lab_core::{JsonFileScenarioSource, Lab, Notification, NotificationLevel};
use labd::{api, LabdConfig};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting labd");

    let config = LabdConfig::load()?;
    info!(lab_name = %config.lab_name, port = config.api_port, "Daemon configured");

    let lab = Arc::new(Lab::named(&config.lab_name, config.lab.clone()).context("Invalid lab configuration")?);

    if let Some(path) = &config.scenario_path {
        let source = JsonFileScenarioSource::new(path);
        match lab.load_scenario(&source).await {
            Ok(scenario) => info!(title = %scenario.title, "Scenario active"),
            Err(e) => warn!(error = %e, "Continuing with the built-in seed"),
        }
    }

    tokio::spawn(log_notifications(lab.events().subscribe_notifications()));
    lab.start();

    let state = Arc::new(api::AppState::new(lab.clone()));
    state.set_ready(true);

    api::serve(config.api_port, state, shutdown_signal()).await?;

    lab.shutdown();
    info!("Shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
}

/// Mirror lab notifications into the daemon log
async fn log_notifications(mut notifications: broadcast::Receiver<Notification>) {
    loop {
        match notifications.recv().await {
            Ok(n) => match n.level {
                NotificationLevel::Error | NotificationLevel::Warning => {
                    warn!(title = %n.title, message = %n.message, "Lab notification")
                }
                NotificationLevel::Info | NotificationLevel::Success => {
                    info!(title = %n.title, message = %n.message, "Lab notification")
                }
            },
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Notification log lagging"),
            Err(RecvError::Closed) => break,
        }
    }
}
