//! Lab configuration
//!
//! Every field has a default so a partially specified config (environment,
//! file, or test override) always deserializes.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::chaos::ChaosSettings;
use crate::error::LabError;
use crate::pipeline::PipelineSettings;
use crate::telemetry::TelemetrySettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    /// RNG seed; unset draws from OS entropy
    pub seed: Option<u64>,

    /// Telemetry tick interval in milliseconds
    pub telemetry_interval_ms: u64,
    /// Points kept per telemetry series
    pub series_capacity: usize,
    /// Deployment records kept
    pub deployment_capacity: usize,

    /// Maximum random delay added to each stage's base duration
    pub stage_jitter_ms: u64,
    /// Probability that a pipeline stage fails on its own
    pub stage_failure_rate: f64,
    /// Probability that the generated canary performs worse than baseline
    pub canary_worse_probability: f64,
    /// Canary traffic weight used when `deploy` is given no `--weight`
    pub default_canary_weight: u8,

    pub latency_injection_ms: u32,
    pub latency_window_ms: u64,
    pub cpu_spike_percent: u32,
    pub cpu_spike_window_ms: u64,
    /// Error -> Pending delay for a failed pod
    pub pod_pending_delay_ms: u64,
    /// Pending -> Running delay for a failed pod
    pub pod_recovery_delay_ms: u64,
    pub auto_chaos_interval_ms: u64,

    /// Resolved incidents kept, most recent first
    pub incident_history_capacity: usize,
    /// Activity log lines kept
    pub log_capacity: usize,

    /// Commands kept in the persisted history
    pub history_capacity: usize,
    /// History file; unset keeps history in memory only
    pub history_path: Option<PathBuf>,

    /// Buffer size of the activity and notification channels
    pub event_buffer: usize,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            seed: None,
            telemetry_interval_ms: 2_000,
            series_capacity: 20,
            deployment_capacity: 10,
            stage_jitter_ms: 800,
            stage_failure_rate: 0.0,
            canary_worse_probability: 0.4,
            default_canary_weight: 10,
            latency_injection_ms: 300,
            latency_window_ms: 8_000,
            cpu_spike_percent: 80,
            cpu_spike_window_ms: 10_000,
            pod_pending_delay_ms: 2_000,
            pod_recovery_delay_ms: 3_000,
            auto_chaos_interval_ms: 20_000,
            incident_history_capacity: 10,
            log_capacity: 200,
            history_capacity: 50,
            history_path: None,
            event_buffer: 256,
        }
    }
}

impl LabConfig {
    /// Default configuration with a fixed seed
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), LabError> {
        if self.telemetry_interval_ms == 0 {
            return Err(LabError::InvalidConfig(
                "telemetry_interval_ms must be positive".to_string(),
            ));
        }
        if self.auto_chaos_interval_ms == 0 {
            return Err(LabError::InvalidConfig(
                "auto_chaos_interval_ms must be positive".to_string(),
            ));
        }
        for (name, p) in [
            ("stage_failure_rate", self.stage_failure_rate),
            ("canary_worse_probability", self.canary_worse_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(LabError::InvalidConfig(format!(
                    "{name} must be within [0, 1], got {p}"
                )));
            }
        }
        if !(1..=99).contains(&self.default_canary_weight) {
            return Err(LabError::InvalidConfig(format!(
                "default_canary_weight must be within 1..=99, got {}",
                self.default_canary_weight
            )));
        }
        if self.series_capacity == 0 || self.history_capacity == 0 {
            return Err(LabError::InvalidConfig(
                "capacities must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            stage_jitter: Duration::from_millis(self.stage_jitter_ms),
            stage_failure_rate: self.stage_failure_rate,
            canary_worse_probability: self.canary_worse_probability,
        }
    }

    pub fn chaos_settings(&self) -> ChaosSettings {
        ChaosSettings {
            latency_injection_ms: self.latency_injection_ms,
            latency_window: Duration::from_millis(self.latency_window_ms),
            cpu_spike_percent: self.cpu_spike_percent,
            cpu_spike_window: Duration::from_millis(self.cpu_spike_window_ms),
            pod_pending_delay: Duration::from_millis(self.pod_pending_delay_ms),
            pod_recovery_delay: Duration::from_millis(self.pod_recovery_delay_ms),
            auto_chaos_interval: Duration::from_millis(self.auto_chaos_interval_ms),
        }
    }

    pub fn telemetry_settings(&self) -> TelemetrySettings {
        TelemetrySettings {
            interval: Duration::from_millis(self.telemetry_interval_ms),
        }
    }
}
