//! Core data models for the lab simulation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::DeployStrategy;

/// Lifecycle status of a simulated pod
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodStatus {
    Running,
    Pending,
    Error,
}

impl std::fmt::Display for PodStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PodStatus::Running => write!(f, "Running"),
            PodStatus::Pending => write!(f, "Pending"),
            PodStatus::Error => write!(f, "Error"),
        }
    }
}

/// A pod scheduled on one of the simulated nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    pub name: String,
    pub service: String,
    pub status: PodStatus,
    pub cpu_request_millicores: u32,
    pub memory_request_mib: u32,
    pub ip: String,
    /// Image tag the pod runs
    pub version: String,
    pub is_canary: bool,
    /// Share of primary-service traffic routed to this pod, in percent
    pub traffic_weight: Option<f64>,
    pub restarts: u32,
}

impl Pod {
    /// Ready column as rendered by `kubectl get pods`
    pub fn ready(&self) -> &'static str {
        match self.status {
            PodStatus::Running => "1/1",
            PodStatus::Pending | PodStatus::Error => "0/1",
        }
    }
}

/// A worker node; the node set is fixed for the lifetime of a cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub cpu_capacity_millicores: u32,
    pub memory_capacity_mib: u32,
    pub pods: Vec<Pod>,
}

impl Node {
    pub fn cpu_requested_millicores(&self) -> u32 {
        self.pods.iter().map(|p| p.cpu_request_millicores).sum()
    }

    pub fn memory_requested_mib(&self) -> u32 {
        self.pods.iter().map(|p| p.memory_request_mib).sum()
    }
}

/// Kind of chaos experiment an incident was opened for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    PodFailure,
    Latency,
    CpuSpike,
}

impl std::fmt::Display for IncidentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentType::PodFailure => write!(f, "PodFailure"),
            IncidentType::Latency => write!(f, "Latency"),
            IncidentType::CpuSpike => write!(f, "CpuSpike"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Investigating,
    Resolved,
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentStatus::Investigating => write!(f, "Investigating"),
            IncidentStatus::Resolved => write!(f, "Resolved"),
        }
    }
}

/// A chaos experiment as seen by the operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub incident_type: IncidentType,
    /// Pod name for pod failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Trigger to recovery, set on resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_observed_ms: Option<u64>,
    pub status: IncidentStatus,
}

/// One sample of a telemetry series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    /// Wall clock label (HH:MM:SS)
    pub label: String,
    pub value: f64,
}

/// Transient perturbations applied by running chaos experiments
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationEffects {
    pub latency_injection_ms: u32,
    pub cpu_spike_percent: u32,
}

impl SimulationEffects {
    pub fn is_quiet(&self) -> bool {
        self.latency_injection_ms == 0 && self.cpu_spike_percent == 0
    }
}

/// A completed rollout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub version: String,
    pub strategy: DeployStrategy,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    Pipeline,
    Chaos,
    System,
}

impl std::fmt::Display for LogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogSource::Pipeline => write!(f, "pipeline"),
            LogSource::Chaos => write!(f, "chaos"),
            LogSource::System => write!(f, "system"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// A line in the lab activity log shown next to the pipeline view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub source: LogSource,
    pub level: LogLevel,
    pub message: String,
}

impl LogLine {
    pub fn new(source: LogSource, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            source,
            level,
            message: message.into(),
        }
    }

    pub fn render(&self) -> String {
        format!(
            "[{}] {:<5} {}: {}",
            self.timestamp.format("%H:%M:%S"),
            self.level,
            self.source,
            self.message
        )
    }
}
