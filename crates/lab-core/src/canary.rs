//! Canary analysis
//!
//! Baseline-vs-canary comparison shown to the operator at the approval gate.
//! Lower is better for every metric. The analysis only informs the promote or
//! rollback decision; nothing here acts on it.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Probability that a generated canary performs worse than its baseline
pub const DEFAULT_WORSE_PROBABILITY: f64 = 0.4;

/// Observed metrics for one side of the comparison
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    pub latency_ms: f64,
    pub error_rate_percent: f64,
    pub cpu_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CanaryMetrics {
    pub baseline: MetricSet,
    pub canary: MetricSet,
}

impl CanaryMetrics {
    /// Generate a baseline and a canary variant that is worse with `worse_probability`
    pub fn generate<R: Rng + ?Sized>(rng: &mut R, worse_probability: f64) -> Self {
        let baseline = MetricSet {
            latency_ms: round2(rng.gen_range(110.0..130.0)),
            error_rate_percent: round2(rng.gen_range(0.1..0.5)),
            cpu_percent: round2(rng.gen_range(30.0..45.0)),
        };

        let canary = if rng.gen_bool(worse_probability.clamp(0.0, 1.0)) {
            MetricSet {
                latency_ms: round2(baseline.latency_ms + rng.gen_range(20.0..80.0)),
                error_rate_percent: round2(baseline.error_rate_percent + rng.gen_range(0.5..2.0)),
                cpu_percent: round2(baseline.cpu_percent + rng.gen_range(5.0..20.0)),
            }
        } else {
            MetricSet {
                latency_ms: round2(baseline.latency_ms - rng.gen_range(0.0..15.0)),
                error_rate_percent: round2(
                    (baseline.error_rate_percent - rng.gen_range(0.0..0.1)).max(0.0),
                ),
                cpu_percent: round2(baseline.cpu_percent - rng.gen_range(0.0..5.0)),
            }
        };

        Self { baseline, canary }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanaryMetric {
    Latency,
    ErrorRate,
    Cpu,
}

impl CanaryMetric {
    pub fn label(&self) -> &'static str {
        match self {
            CanaryMetric::Latency => "latency (ms)",
            CanaryMetric::ErrorRate => "error rate (%)",
            CanaryMetric::Cpu => "cpu (%)",
        }
    }
}

/// Direction of a metric change, lower being better
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricTrend {
    Improved,
    Unchanged,
    Worse,
}

impl std::fmt::Display for MetricTrend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricTrend::Improved => write!(f, "improved"),
            MetricTrend::Unchanged => write!(f, "unchanged"),
            MetricTrend::Worse => write!(f, "worse"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricDelta {
    pub metric: CanaryMetric,
    pub baseline: f64,
    pub canary: f64,
    pub delta: f64,
    pub trend: MetricTrend,
}

impl MetricDelta {
    fn compute(metric: CanaryMetric, baseline: f64, canary: f64) -> Self {
        let delta = canary - baseline;
        Self {
            metric,
            baseline,
            canary,
            delta,
            trend: classify(metric, delta),
        }
    }
}

/// Latency and error rate count a zero delta as improved; CPU reports it as unchanged.
pub fn classify(metric: CanaryMetric, delta: f64) -> MetricTrend {
    match metric {
        CanaryMetric::Latency | CanaryMetric::ErrorRate => {
            if delta <= 0.0 {
                MetricTrend::Improved
            } else {
                MetricTrend::Worse
            }
        }
        CanaryMetric::Cpu => {
            if delta < 0.0 {
                MetricTrend::Improved
            } else if delta > 0.0 {
                MetricTrend::Worse
            } else {
                MetricTrend::Unchanged
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryAnalysis {
    pub deltas: Vec<MetricDelta>,
}

impl CanaryAnalysis {
    pub fn worse_count(&self) -> usize {
        self.deltas
            .iter()
            .filter(|d| d.trend == MetricTrend::Worse)
            .count()
    }

    pub fn delta(&self, metric: CanaryMetric) -> Option<&MetricDelta> {
        self.deltas.iter().find(|d| d.metric == metric)
    }

    /// Table rows for the terminal `status` command
    pub fn render_lines(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "{:<16}{:>10}{:>10}{:>10}  {}",
            "METRIC", "BASELINE", "CANARY", "DELTA", "TREND"
        )];
        for d in &self.deltas {
            lines.push(format!(
                "{:<16}{:>10.2}{:>10.2}{:>+10.2}  {}",
                d.metric.label(),
                d.baseline,
                d.canary,
                d.delta,
                d.trend
            ));
        }
        lines
    }
}

/// Compare canary against baseline for latency, error rate and CPU
pub fn analyze(metrics: &CanaryMetrics) -> CanaryAnalysis {
    let CanaryMetrics { baseline, canary } = metrics;
    CanaryAnalysis {
        deltas: vec![
            MetricDelta::compute(CanaryMetric::Latency, baseline.latency_ms, canary.latency_ms),
            MetricDelta::compute(
                CanaryMetric::ErrorRate,
                baseline.error_rate_percent,
                canary.error_rate_percent,
            ),
            MetricDelta::compute(CanaryMetric::Cpu, baseline.cpu_percent, canary.cpu_percent),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::seeded;

    fn metrics(baseline: (f64, f64, f64), canary: (f64, f64, f64)) -> CanaryMetrics {
        CanaryMetrics {
            baseline: MetricSet {
                latency_ms: baseline.0,
                error_rate_percent: baseline.1,
                cpu_percent: baseline.2,
            },
            canary: MetricSet {
                latency_ms: canary.0,
                error_rate_percent: canary.1,
                cpu_percent: canary.2,
            },
        }
    }

    #[test]
    fn test_all_improved() {
        let analysis = analyze(&metrics((120.0, 0.4, 40.0), (110.0, 0.2, 35.0)));
        assert_eq!(analysis.worse_count(), 0);
        assert!(analysis
            .deltas
            .iter()
            .all(|d| d.trend == MetricTrend::Improved));
        let latency = analysis.delta(CanaryMetric::Latency).unwrap();
        assert!((latency.delta + 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_all_worse() {
        let analysis = analyze(&metrics((120.0, 0.4, 40.0), (180.0, 1.4, 55.0)));
        assert_eq!(analysis.worse_count(), 3);
    }

    #[test]
    fn test_zero_delta_classification() {
        let analysis = analyze(&metrics((120.0, 0.4, 40.0), (120.0, 0.4, 40.0)));
        assert_eq!(
            analysis.delta(CanaryMetric::Latency).unwrap().trend,
            MetricTrend::Improved
        );
        assert_eq!(
            analysis.delta(CanaryMetric::ErrorRate).unwrap().trend,
            MetricTrend::Improved
        );
        assert_eq!(
            analysis.delta(CanaryMetric::Cpu).unwrap().trend,
            MetricTrend::Unchanged
        );
    }

    #[test]
    fn test_generate_respects_probability_extremes() {
        let mut rng = seeded(Some(11));
        for _ in 0..50 {
            let worse = CanaryMetrics::generate(&mut rng, 1.0);
            assert_eq!(analyze(&worse).worse_count(), 3);

            let better = CanaryMetrics::generate(&mut rng, 0.0);
            assert_eq!(analyze(&better).worse_count(), 0);
        }
    }

    #[test]
    fn test_render_lines_has_header_and_rows() {
        let analysis = analyze(&metrics((120.0, 0.4, 40.0), (130.0, 0.3, 40.0)));
        let lines = analysis.render_lines();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("METRIC"));
        assert!(lines[1].contains("worse"));
        assert!(lines[3].contains("unchanged"));
    }
}
