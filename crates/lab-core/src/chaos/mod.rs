//! Chaos experiments
//!
//! An experiment perturbs the cluster or the simulation effects for a bounded
//! window, opens an incident, and recovers on a timer.

mod engine;
mod incidents;

pub use engine::{ChaosEngine, ChaosOutcome};
pub use incidents::IncidentLog;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::models::{IncidentType, SimulationEffects};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChaosScenario {
    PodFailure,
    Latency,
    CpuSpike,
}

impl ChaosScenario {
    pub const ALL: [ChaosScenario; 3] = [
        ChaosScenario::PodFailure,
        ChaosScenario::Latency,
        ChaosScenario::CpuSpike,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ChaosScenario::PodFailure => "pod_failure",
            ChaosScenario::Latency => "latency",
            ChaosScenario::CpuSpike => "cpu_spike",
        }
    }

    pub fn incident_type(&self) -> IncidentType {
        match self {
            ChaosScenario::PodFailure => IncidentType::PodFailure,
            ChaosScenario::Latency => IncidentType::Latency,
            ChaosScenario::CpuSpike => IncidentType::CpuSpike,
        }
    }

    /// Set or clear this scenario's global effect. Pod failure has none.
    fn set_effect(&self, effects: &mut SimulationEffects, settings: &ChaosSettings, active: bool) {
        match self {
            ChaosScenario::Latency => {
                effects.latency_injection_ms = if active { settings.latency_injection_ms } else { 0 };
            }
            ChaosScenario::CpuSpike => {
                effects.cpu_spike_percent = if active { settings.cpu_spike_percent } else { 0 };
            }
            ChaosScenario::PodFailure => {}
        }
    }

    fn window(&self, settings: &ChaosSettings) -> Duration {
        match self {
            ChaosScenario::Latency => settings.latency_window,
            ChaosScenario::CpuSpike => settings.cpu_spike_window,
            ChaosScenario::PodFailure => settings.pod_pending_delay + settings.pod_recovery_delay,
        }
    }
}

impl std::fmt::Display for ChaosScenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChaosScenario {
    type Err = ChaosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "pod_failure" => Ok(ChaosScenario::PodFailure),
            "latency" => Ok(ChaosScenario::Latency),
            "cpu_spike" => Ok(ChaosScenario::CpuSpike),
            _ => Err(ChaosError::UnknownScenario(s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChaosSettings {
    pub latency_injection_ms: u32,
    pub latency_window: Duration,
    pub cpu_spike_percent: u32,
    pub cpu_spike_window: Duration,
    pub pod_pending_delay: Duration,
    pub pod_recovery_delay: Duration,
    pub auto_chaos_interval: Duration,
}

impl Default for ChaosSettings {
    fn default() -> Self {
        Self {
            latency_injection_ms: 300,
            latency_window: Duration::from_secs(8),
            cpu_spike_percent: 80,
            cpu_spike_window: Duration::from_secs(10),
            pod_pending_delay: Duration::from_secs(2),
            pod_recovery_delay: Duration::from_secs(3),
            auto_chaos_interval: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChaosError {
    #[error("unknown chaos scenario '{0}' (expected pod_failure, latency or cpu_spike)")]
    UnknownScenario(String),

    #[error("no pods available to fail")]
    NoPods,

    #[error("lab is shut down")]
    ShutDown,
}

/// An effect whose recovery callback is still pending
#[derive(Debug, Clone)]
pub(crate) struct InFlight {
    pub token: u64,
    pub incident_id: String,
    pub started: Instant,
}

/// In-flight experiments keyed by effect (`latency`, `cpu_spike`, `pod:<name>`).
/// Re-arming a key hands out a new token, which turns the earlier recovery
/// callback into a no-op.
#[derive(Debug, Default)]
pub(crate) struct ChaosLedger {
    next_token: u64,
    in_flight: HashMap<String, InFlight>,
}

impl ChaosLedger {
    pub fn current(&self, key: &str) -> Option<&InFlight> {
        self.in_flight.get(key)
    }

    pub fn arm(&mut self, key: &str, incident_id: String, started: Instant) -> u64 {
        self.next_token += 1;
        let token = self.next_token;
        self.in_flight.insert(
            key.to_string(),
            InFlight {
                token,
                incident_id,
                started,
            },
        );
        token
    }

    pub fn is_current(&self, key: &str, token: u64) -> bool {
        self.in_flight.get(key).is_some_and(|f| f.token == token)
    }

    /// Remove the entry if `token` still owns it
    pub fn disarm(&mut self, key: &str, token: u64) -> Option<InFlight> {
        if !self.is_current(key, token) {
            return None;
        }
        self.in_flight.remove(key)
    }

    /// Lowest token the next `arm` can hand out
    pub fn fence(&self) -> u64 {
        self.next_token + 1
    }

    pub fn clear(&mut self) {
        self.in_flight.clear();
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_parsing() {
        assert_eq!("latency".parse::<ChaosScenario>().unwrap(), ChaosScenario::Latency);
        assert_eq!("pod-failure".parse::<ChaosScenario>().unwrap(), ChaosScenario::PodFailure);
        assert_eq!("CPU_SPIKE".parse::<ChaosScenario>().unwrap(), ChaosScenario::CpuSpike);
        assert_eq!(
            "meteor".parse::<ChaosScenario>(),
            Err(ChaosError::UnknownScenario("meteor".to_string()))
        );
    }

    #[test]
    fn test_set_effect() {
        let settings = ChaosSettings::default();
        let mut effects = SimulationEffects::default();
        ChaosScenario::Latency.set_effect(&mut effects, &settings, true);
        assert_eq!(effects.latency_injection_ms, 300);
        ChaosScenario::CpuSpike.set_effect(&mut effects, &settings, true);
        assert_eq!(effects.cpu_spike_percent, 80);
        ChaosScenario::Latency.set_effect(&mut effects, &settings, false);
        assert_eq!(effects.latency_injection_ms, 0);
        assert_eq!(effects.cpu_spike_percent, 80);
    }

    #[test]
    fn test_ledger_token_ownership() {
        let mut ledger = ChaosLedger::default();
        let first = ledger.arm("latency", "INC-1001".into(), Instant::now());
        let second = ledger.arm("latency", "INC-1001".into(), Instant::now());

        assert!(!ledger.is_current("latency", first));
        assert!(ledger.disarm("latency", first).is_none());
        assert_eq!(ledger.len(), 1);
        assert!(ledger.disarm("latency", second).is_some());
        assert_eq!(ledger.len(), 0);

        let fence = ledger.fence();
        ledger.clear();
        assert!(ledger.arm("cpu_spike", "INC-1002".into(), Instant::now()) >= fence);
    }
}
