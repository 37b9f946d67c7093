//! Dashboard telemetry
//!
//! Three fixed-capacity series (CPU, memory, API p95 latency) fed by a
//! periodic tick, plus the record of completed deployments.

mod generator;
mod r#loop;

pub use generator::{next_baseline, next_point, observe, SeriesBounds, SeriesKind};
pub use r#loop::{TelemetryLoop, TelemetrySettings};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::models::{DeploymentRecord, SimulationEffects, TimeSeriesPoint};
use crate::ring::RingBuffer;

/// Default number of points kept per series
pub const DEFAULT_SERIES_CAPACITY: usize = 20;

/// Default number of deployment records kept
pub const DEFAULT_DEPLOYMENT_CAPACITY: usize = 10;

#[derive(Debug, Clone)]
pub struct Series {
    kind: SeriesKind,
    baseline: f64,
    points: RingBuffer<TimeSeriesPoint>,
}

impl Series {
    pub fn new(kind: SeriesKind, capacity: usize) -> Self {
        Self {
            kind,
            baseline: kind.bounds().initial,
            points: RingBuffer::new(capacity),
        }
    }

    pub fn kind(&self) -> SeriesKind {
        self.kind
    }

    pub fn points(&self) -> &RingBuffer<TimeSeriesPoint> {
        &self.points
    }

    pub fn latest(&self) -> Option<f64> {
        self.points.latest().map(|p| p.value)
    }

    fn advance<R: Rng + ?Sized>(&mut self, effects: &SimulationEffects, at: DateTime<Utc>, rng: &mut R) {
        let (baseline, point) = next_point(self.kind, self.baseline, effects, at, rng);
        self.baseline = baseline;
        self.points.push(point);
    }
}

#[derive(Debug, Clone)]
pub struct Telemetry {
    pub cpu: Series,
    pub memory: Series,
    pub api_latency: Series,
    deployments: RingBuffer<DeploymentRecord>,
    deployment_count: u64,
}

impl Telemetry {
    pub fn new(series_capacity: usize, deployment_capacity: usize) -> Self {
        Self {
            cpu: Series::new(SeriesKind::Cpu, series_capacity),
            memory: Series::new(SeriesKind::Memory, series_capacity),
            api_latency: Series::new(SeriesKind::ApiLatency, series_capacity),
            deployments: RingBuffer::new(deployment_capacity),
            deployment_count: 0,
        }
    }

    /// Append one point to every series
    pub fn tick<R: Rng + ?Sized>(&mut self, effects: SimulationEffects, at: DateTime<Utc>, rng: &mut R) {
        self.cpu.advance(&effects, at, rng);
        self.memory.advance(&effects, at, rng);
        self.api_latency.advance(&effects, at, rng);
    }

    pub fn record_deployment(&mut self, record: DeploymentRecord) {
        self.deployments.push(record);
        self.deployment_count += 1;
    }

    pub fn deployments(&self) -> &RingBuffer<DeploymentRecord> {
        &self.deployments
    }

    pub fn deployment_count(&self) -> u64 {
        self.deployment_count
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            cpu: self.cpu.points.to_vec(),
            memory: self.memory.points.to_vec(),
            api_latency: self.api_latency.points.to_vec(),
            deployments: self.deployments.to_vec(),
            deployment_count: self.deployment_count,
        }
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new(DEFAULT_SERIES_CAPACITY, DEFAULT_DEPLOYMENT_CAPACITY)
    }
}

/// Read-only copy of the telemetry series, oldest point first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub cpu: Vec<TimeSeriesPoint>,
    pub memory: Vec<TimeSeriesPoint>,
    pub api_latency: Vec<TimeSeriesPoint>,
    pub deployments: Vec<DeploymentRecord>,
    pub deployment_count: u64,
}
