//! Daemon configuration

use anyhow::Result;
use config::{Config, Environment};
use lab_core::LabConfig;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::warn;

/// Daemon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LabdConfig {
    /// Name attached to every structured log line
    #[serde(default = "default_lab_name")]
    pub lab_name: String,

    /// API server port for the lab API, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Scenario JSON file loaded at startup
    #[serde(default)]
    pub scenario_path: Option<PathBuf>,

    /// Simulation settings, e.g. `LABD_LAB__SEED=7`
    #[serde(default)]
    pub lab: LabConfig,
}

fn default_lab_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "devops-lab".to_string())
}

fn default_api_port() -> u16 {
    8080
}

impl Default for LabdConfig {
    fn default() -> Self {
        Self {
            lab_name: default_lab_name(),
            api_port: default_api_port(),
            scenario_path: None,
            lab: LabConfig::default(),
        }
    }
}

impl LabdConfig {
    /// Load configuration from `LABD_*` environment variables
    pub fn load() -> Result<Self> {
        Self::from_environment(Self::environment())
    }

    fn environment() -> Environment {
        Environment::with_prefix("LABD")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    fn from_environment(environment: Environment) -> Result<Self> {
        let config = Config::builder().add_source(environment).build()?;

        Ok(config.try_deserialize().unwrap_or_else(|e| {
            warn!(error = %e, "Invalid daemon configuration, using defaults");
            LabdConfig::default()
        }))
    }
}
