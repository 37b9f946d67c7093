//! Deployment pipeline
//!
//! A run walks the stage list in order. Every stage before the canary gate
//! runs automatically; reaching the gate schedules a canary pod and pauses
//! until the operator promotes or rolls back. Promote runs the production
//! stage, rollback abandons the run.

mod engine;
mod stage;

pub use engine::{
    begin_stage, complete_production, complete_stage, PipelineEngine, ProductionOutcome, StageOutcome,
    StagePlan,
};
pub use stage::{default_templates, transition, PipelineStage, StageEvent, StageStatus, StageTemplate};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Idle,
    Deploying,
    PausedCanary,
    Failed,
    Completed,
}

impl PipelineStatus {
    /// A new run may start from a resting state
    pub fn accepts_start(&self) -> bool {
        matches!(self, PipelineStatus::Idle | PipelineStatus::Failed)
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStatus::Idle => write!(f, "idle"),
            PipelineStatus::Deploying => write!(f, "deploying"),
            PipelineStatus::PausedCanary => write!(f, "paused_canary"),
            PipelineStatus::Failed => write!(f, "failed"),
            PipelineStatus::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeployStrategy {
    Canary,
    BlueGreen,
}

impl std::fmt::Display for DeployStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeployStrategy::Canary => write!(f, "canary"),
            DeployStrategy::BlueGreen => write!(f, "blue-green"),
        }
    }
}

impl FromStr for DeployStrategy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "canary" => Ok(DeployStrategy::Canary),
            "blue-green" | "bluegreen" | "blue_green" => Ok(DeployStrategy::BlueGreen),
            other => Err(PipelineError::InvalidConfig(format!(
                "unknown strategy '{other}' (expected canary or blue-green)"
            ))),
        }
    }
}

/// Resolved parameters of one deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployConfig {
    pub strategy: DeployStrategy,
    /// Percent of primary traffic routed to the canary
    pub traffic_weight_percent: u8,
    pub version_tag: String,
}

impl DeployConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(1..=99).contains(&self.traffic_weight_percent) {
            return Err(PipelineError::InvalidConfig(format!(
                "weight must be between 1 and 99, got {}",
                self.traffic_weight_percent
            )));
        }
        if self.version_tag.trim().is_empty() || self.version_tag.contains(char::is_whitespace) {
            return Err(PipelineError::InvalidConfig(format!(
                "invalid version tag '{}'",
                self.version_tag
            )));
        }
        Ok(())
    }

    /// Weight the canary (or green) pod carries while the gate is open
    pub fn canary_weight(&self) -> f64 {
        f64::from(self.traffic_weight_percent)
    }
}

/// Operator-supplied deploy options; unset fields take defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeployRequest {
    pub strategy: Option<DeployStrategy>,
    pub weight: Option<u8>,
    pub version: Option<String>,
}

impl DeployRequest {
    pub fn resolve(&self, current_version: &str, default_weight: u8) -> DeployConfig {
        DeployConfig {
            strategy: self.strategy.unwrap_or(DeployStrategy::Canary),
            traffic_weight_percent: self.weight.unwrap_or(default_weight),
            version_tag: self
                .version
                .clone()
                .unwrap_or_else(|| next_version(current_version)),
        }
    }
}

/// Next minor release of a `vMAJOR.MINOR.PATCH` tag
pub fn next_version(current: &str) -> String {
    let trimmed = current.trim_start_matches('v');
    let parts: Vec<&str> = trimmed.split('.').collect();
    if let [major, minor, _patch] = parts.as_slice() {
        if let (Ok(major), Ok(minor)) = (major.parse::<u32>(), minor.parse::<u32>()) {
            return format!("v{}.{}.0", major, minor + 1);
        }
    }
    format!("{current}-next")
}

/// The pipeline as a whole
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub status: PipelineStatus,
    /// Generation token; bumped on every start, rollback and teardown so
    /// callbacks scheduled by an earlier run become no-ops
    pub run_id: u64,
    pub config: Option<DeployConfig>,
    pub stages: Vec<PipelineStage>,
    pub started_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn idle(templates: &[StageTemplate], service: &str) -> Self {
        Self {
            status: PipelineStatus::Idle,
            run_id: 0,
            config: None,
            stages: templates
                .iter()
                .map(|t| t.instantiate(service, "latest", 0))
                .collect(),
            started_at: None,
        }
    }

    /// Fresh run with every stage queued
    pub fn begin(run_id: u64, templates: &[StageTemplate], service: &str, config: DeployConfig) -> Self {
        Self {
            status: PipelineStatus::Deploying,
            run_id,
            stages: templates
                .iter()
                .map(|t| t.instantiate(service, &config.version_tag, config.traffic_weight_percent))
                .collect(),
            config: Some(config),
            started_at: Some(Utc::now()),
        }
    }

    /// Index of the stage that opens the canary gate
    pub fn canary_index(&self) -> usize {
        self.stages.len().saturating_sub(2)
    }

    pub fn production_index(&self) -> usize {
        self.stages.len().saturating_sub(1)
    }

    pub fn version(&self) -> Option<&str> {
        self.config.as_ref().map(|c| c.version_tag.as_str())
    }

    pub fn current_stage(&self) -> Option<&PipelineStage> {
        self.stages.iter().find(|s| s.status == StageStatus::InProgress)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Upper bound of the random delay added to each stage
    pub stage_jitter: Duration,
    pub stage_failure_rate: f64,
    pub canary_worse_probability: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            stage_jitter: Duration::from_millis(800),
            stage_failure_rate: 0.0,
            canary_worse_probability: crate::canary::DEFAULT_WORSE_PROBABILITY,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    #[error("deployment already in progress (pipeline is {status})")]
    AlreadyInProgress { status: PipelineStatus },

    #[error("cannot {action} while pipeline is {status}")]
    InvalidTransition {
        action: &'static str,
        status: PipelineStatus,
    },

    #[error("invalid deploy options: {0}")]
    InvalidConfig(String),

    #[error("lab is shut down")]
    ShutDown,
}
