//! Shared simulation state
//!
//! Cluster, pipeline run, canary metrics, incidents, effects and telemetry all
//! live in one `LabState` behind a single lock. Every mutation is one closure
//! applied under the write lock, and readers get cloned snapshots, so no
//! reader ever sees a partially applied change. The lock is never held across
//! an await point.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};

use crate::canary::{analyze, CanaryAnalysis, CanaryMetrics};
use crate::chaos::{ChaosLedger, IncidentLog};
use crate::cluster::Cluster;
use crate::config::LabConfig;
use crate::models::{Incident, LogLevel, LogLine, LogSource, SimulationEffects};
use crate::pipeline::{default_templates, PipelineRun};
use crate::ring::RingBuffer;
use crate::rng;
use crate::telemetry::{Telemetry, TelemetrySnapshot};

/// Metadata of the scenario the lab was seeded from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioInfo {
    pub title: String,
    pub description: String,
    pub is_incident: bool,
    pub log_theme: String,
}

pub struct LabState {
    pub cluster: Cluster,
    pub pipeline: PipelineRun,
    pub canary: Option<CanaryMetrics>,
    pub incidents: IncidentLog,
    pub effects: SimulationEffects,
    pub telemetry: Telemetry,
    pub logs: RingBuffer<LogLine>,
    pub scenario: Option<ScenarioInfo>,
    pub(crate) chaos: ChaosLedger,
    pub(crate) rng: StdRng,
}

impl LabState {
    /// Built-in seed state
    pub fn new(config: &LabConfig) -> Self {
        let mut rng = rng::seeded(config.seed);
        let cluster = Cluster::builtin(&mut rng);
        let pipeline = PipelineRun::idle(&default_templates(), &cluster.primary_service);

        Self {
            cluster,
            pipeline,
            canary: None,
            incidents: IncidentLog::new(config.incident_history_capacity),
            effects: SimulationEffects::default(),
            telemetry: Telemetry::new(config.series_capacity, config.deployment_capacity),
            logs: RingBuffer::new(config.log_capacity),
            scenario: None,
            chaos: ChaosLedger::default(),
            rng,
        }
    }

    pub fn log(&mut self, source: LogSource, level: LogLevel, message: impl Into<String>) {
        self.logs.push(LogLine::new(source, level, message));
    }
}

pub struct SharedState {
    inner: RwLock<LabState>,
}

impl SharedState {
    pub fn new(config: &LabConfig) -> Self {
        Self::from_state(LabState::new(config))
    }

    pub fn from_state(state: LabState) -> Self {
        Self {
            inner: RwLock::new(state),
        }
    }

    /// Apply one atomic mutation
    pub fn apply<R>(&self, f: impl FnOnce(&mut LabState) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Read under the shared lock
    pub fn read<R>(&self, f: impl FnOnce(&LabState) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn snapshot(&self) -> LabSnapshot {
        self.read(LabSnapshot::capture)
    }
}

/// Immutable copy of the whole simulation, handed to presentation layers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabSnapshot {
    pub taken_at: DateTime<Utc>,
    pub cluster: Cluster,
    pub pipeline: PipelineRun,
    pub canary: Option<CanaryMetrics>,
    pub canary_analysis: Option<CanaryAnalysis>,
    pub active_incidents: Vec<Incident>,
    /// Resolved incidents, most recent first
    pub incident_history: Vec<Incident>,
    pub effects: SimulationEffects,
    pub telemetry: TelemetrySnapshot,
    /// Oldest line first
    pub logs: Vec<LogLine>,
    pub scenario: Option<ScenarioInfo>,
}

impl LabSnapshot {
    fn capture(state: &LabState) -> Self {
        Self {
            taken_at: Utc::now(),
            cluster: state.cluster.clone(),
            pipeline: state.pipeline.clone(),
            canary: state.canary,
            canary_analysis: state.canary.as_ref().map(analyze),
            active_incidents: state.incidents.active().to_vec(),
            incident_history: state.incidents.history(),
            effects: state.effects,
            telemetry: state.telemetry.snapshot(),
            logs: state.logs.to_vec(),
            scenario: state.scenario.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineStatus;

    #[test]
    fn test_new_state_is_idle_and_consistent() {
        let state = SharedState::new(&LabConfig::seeded(1));
        let snapshot = state.snapshot();
        assert_eq!(snapshot.pipeline.status, PipelineStatus::Idle);
        assert!(snapshot.canary.is_none());
        assert!(snapshot.cluster.weights_consistent());
        assert!(snapshot.effects.is_quiet());
        assert_eq!(snapshot.pipeline.stages.len(), 6);
    }

    #[test]
    fn test_apply_is_visible_to_later_snapshots_only() {
        let state = SharedState::new(&LabConfig::seeded(2));
        let before = state.snapshot();

        state.apply(|s| {
            s.effects.cpu_spike_percent = 80;
            s.log(LogSource::System, LogLevel::Info, "spike");
        });

        assert_eq!(before.effects.cpu_spike_percent, 0);
        let after = state.snapshot();
        assert_eq!(after.effects.cpu_spike_percent, 80);
        assert_eq!(after.logs.last().unwrap().message, "spike");
    }

    #[test]
    fn test_same_seed_same_cluster() {
        let a = SharedState::new(&LabConfig::seeded(77)).snapshot();
        let b = SharedState::new(&LabConfig::seeded(77)).snapshot();
        assert_eq!(a.cluster, b.cluster);
    }

    #[test]
    fn test_snapshot_serializes() {
        let snapshot = SharedState::new(&LabConfig::seeded(3)).snapshot();
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["pipeline"]["status"], "idle");
        let back: LabSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back.cluster, snapshot.cluster);
    }
}
