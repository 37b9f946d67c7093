//! Bounded random walk telemetry
//!
//! Each series keeps an unperturbed baseline that wanders inside fixed bounds.
//! Active simulation effects are layered on top of the baseline when a point
//! is emitted, so recovery snaps straight back to normal behavior.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::models::{SimulationEffects, TimeSeriesPoint};
use crate::rng::jitter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesKind {
    Cpu,
    Memory,
    ApiLatency,
}

/// Walk parameters for one series
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesBounds {
    pub initial: f64,
    pub min: f64,
    pub max: f64,
    /// Maximum step between consecutive baseline values
    pub step: f64,
    /// Hard ceiling on emitted values, effects included
    pub ceiling: f64,
}

impl SeriesKind {
    pub fn bounds(&self) -> SeriesBounds {
        match self {
            SeriesKind::Cpu => SeriesBounds {
                initial: 35.0,
                min: 15.0,
                max: 65.0,
                step: 6.0,
                ceiling: 100.0,
            },
            SeriesKind::Memory => SeriesBounds {
                initial: 55.0,
                min: 40.0,
                max: 70.0,
                step: 3.0,
                ceiling: 100.0,
            },
            SeriesKind::ApiLatency => SeriesBounds {
                initial: 120.0,
                min: 80.0,
                max: 160.0,
                step: 15.0,
                ceiling: 2000.0,
            },
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            SeriesKind::Cpu | SeriesKind::Memory => "%",
            SeriesKind::ApiLatency => "ms",
        }
    }
}

/// Advance a baseline one step inside its bounds
pub fn next_baseline<R: Rng + ?Sized>(kind: SeriesKind, prev: f64, rng: &mut R) -> f64 {
    let bounds = kind.bounds();
    (prev + jitter(rng, bounds.step)).clamp(bounds.min, bounds.max)
}

/// Value observed for a baseline once the active effects are applied
pub fn observe<R: Rng + ?Sized>(
    kind: SeriesKind,
    baseline: f64,
    effects: &SimulationEffects,
    rng: &mut R,
) -> f64 {
    let bounds = kind.bounds();
    let value = match kind {
        SeriesKind::Cpu if effects.cpu_spike_percent > 0 => {
            let spike = effects.cpu_spike_percent as f64;
            spike.max(baseline) + rng.gen_range(0.0..15.0)
        }
        SeriesKind::Cpu | SeriesKind::Memory => baseline,
        SeriesKind::ApiLatency => {
            let injected = effects.latency_injection_ms as f64;
            let noise = if injected > 0.0 {
                rng.gen_range(0.0..50.0)
            } else {
                0.0
            };
            // CPU saturation also slows request handling
            let contention = effects.cpu_spike_percent as f64 * 0.5;
            baseline + injected + noise + contention
        }
    };
    round1(value.clamp(0.0, bounds.ceiling))
}

/// Produce the next point of a series from its previous baseline.
/// Returns the new baseline alongside the emitted point.
pub fn next_point<R: Rng + ?Sized>(
    kind: SeriesKind,
    prev_baseline: f64,
    effects: &SimulationEffects,
    at: DateTime<Utc>,
    rng: &mut R,
) -> (f64, TimeSeriesPoint) {
    let baseline = next_baseline(kind, prev_baseline, rng);
    let value = observe(kind, baseline, effects, rng);
    let point = TimeSeriesPoint {
        timestamp: at.timestamp_millis(),
        label: at.format("%H:%M:%S").to_string(),
        value,
    };
    (baseline, point)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
