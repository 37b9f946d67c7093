//! Observability infrastructure for the lab
//!
//! Provides:
//! - Prometheus metrics (command outcomes, deployments, incidents, stage durations)
//! - Structured JSON logging with tracing

use prometheus::{register_histogram_vec, register_int_counter, register_int_counter_vec};
use prometheus::{HistogramVec, IntCounter, IntCounterVec};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for simulated stage durations (in seconds)
const STAGE_BUCKETS: &[f64] = &[0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 4.0, 5.0, 7.5, 10.0, 30.0, 60.0];

/// Global metrics instance (registered once per process)
static GLOBAL_METRICS: OnceLock<LabMetricsInner> = OnceLock::new();

struct LabMetricsInner {
    commands_total: IntCounterVec,
    deployments_total: IntCounterVec,
    rollbacks_total: IntCounter,
    incidents_opened_total: IntCounterVec,
    incidents_resolved_total: IntCounterVec,
    stage_duration_seconds: HistogramVec,
    telemetry_ticks_total: IntCounter,
}

impl LabMetricsInner {
    fn new() -> Self {
        Self {
            commands_total: register_int_counter_vec!(
                "devops_lab_commands_total",
                "Terminal commands processed, by outcome",
                &["outcome"]
            )
            .expect("Failed to register commands_total"),

            deployments_total: register_int_counter_vec!(
                "devops_lab_deployments_total",
                "Pipeline runs that reached a terminal state, by result",
                &["result"]
            )
            .expect("Failed to register deployments_total"),

            rollbacks_total: register_int_counter!(
                "devops_lab_rollbacks_total",
                "Total number of rollbacks"
            )
            .expect("Failed to register rollbacks_total"),

            incidents_opened_total: register_int_counter_vec!(
                "devops_lab_incidents_opened_total",
                "Incidents opened by chaos experiments",
                &["type"]
            )
            .expect("Failed to register incidents_opened_total"),

            incidents_resolved_total: register_int_counter_vec!(
                "devops_lab_incidents_resolved_total",
                "Incidents resolved after their effect window",
                &["type"]
            )
            .expect("Failed to register incidents_resolved_total"),

            stage_duration_seconds: register_histogram_vec!(
                "devops_lab_stage_duration_seconds",
                "Observed duration of simulated pipeline stages",
                &["stage"],
                STAGE_BUCKETS.to_vec()
            )
            .expect("Failed to register stage_duration_seconds"),

            telemetry_ticks_total: register_int_counter!(
                "devops_lab_telemetry_ticks_total",
                "Total number of telemetry ticks"
            )
            .expect("Failed to register telemetry_ticks_total"),
        }
    }
}

/// Lab metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone, Debug)]
pub struct LabMetrics {
    _private: (),
}

impl Default for LabMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl LabMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(LabMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &'static LabMetricsInner {
        GLOBAL_METRICS.get_or_init(LabMetricsInner::new)
    }

    pub fn inc_commands_accepted(&self) {
        self.inner().commands_total.with_label_values(&["accepted"]).inc();
    }

    pub fn inc_commands_rejected(&self) {
        self.inner().commands_total.with_label_values(&["rejected"]).inc();
    }

    pub fn inc_deployments_completed(&self) {
        self.inner().deployments_total.with_label_values(&["completed"]).inc();
    }

    pub fn inc_deployments_failed(&self) {
        self.inner().deployments_total.with_label_values(&["failed"]).inc();
    }

    pub fn inc_rollbacks(&self) {
        self.inner().rollbacks_total.inc();
    }

    pub fn inc_incidents_opened(&self, incident_type: &str) {
        self.inner()
            .incidents_opened_total
            .with_label_values(&[incident_type])
            .inc();
    }

    pub fn inc_incidents_resolved(&self, incident_type: &str) {
        self.inner()
            .incidents_resolved_total
            .with_label_values(&[incident_type])
            .inc();
    }

    pub fn observe_stage_duration(&self, stage: &str, duration_secs: f64) {
        self.inner()
            .stage_duration_seconds
            .with_label_values(&[stage])
            .observe(duration_secs);
    }

    pub fn inc_telemetry_ticks(&self) {
        self.inner().telemetry_ticks_total.inc();
    }
}

/// Structured logger for lab events
///
/// Emits consistent tracing events for pipeline, chaos and terminal activity
/// so the JSON log stream can be filtered on the `event` field.
#[derive(Clone, Debug)]
pub struct StructuredLogger {
    lab_name: String,
}

impl StructuredLogger {
    pub fn new(lab_name: impl Into<String>) -> Self {
        Self {
            lab_name: lab_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str, pods: usize) {
        info!(
            event = "lab_started",
            lab = %self.lab_name,
            lab_version = %version,
            pods = pods,
            "DevOps lab started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "lab_shutdown",
            lab = %self.lab_name,
            reason = %reason,
            "DevOps lab shutting down"
        );
    }

    pub fn log_command(&self, verb: &str, accepted: bool) {
        info!(
            event = "terminal_command",
            lab = %self.lab_name,
            verb = %verb,
            accepted = accepted,
            "Terminal command processed"
        );
    }

    pub fn log_run_started(&self, run_id: u64, strategy: &str, version: &str, weight: u8) {
        info!(
            event = "deployment_started",
            lab = %self.lab_name,
            run_id = run_id,
            strategy = %strategy,
            version = %version,
            weight = weight,
            "Deployment pipeline started"
        );
    }

    pub fn log_stage(&self, run_id: u64, stage: &str, status: &str, duration_ms: u64) {
        info!(
            event = "stage_finished",
            lab = %self.lab_name,
            run_id = run_id,
            stage = %stage,
            status = %status,
            duration_ms = duration_ms,
            "Pipeline stage finished"
        );
    }

    /// Log a run reaching a terminal or paused state
    pub fn log_run_outcome(&self, run_id: u64, outcome: &str, version: &str) {
        match outcome {
            "failed" => {
                warn!(
                    event = "deployment_finished",
                    lab = %self.lab_name,
                    run_id = run_id,
                    outcome = %outcome,
                    version = %version,
                    "Deployment failed"
                );
            }
            _ => {
                info!(
                    event = "deployment_finished",
                    lab = %self.lab_name,
                    run_id = run_id,
                    outcome = %outcome,
                    version = %version,
                    "Deployment reached {}", outcome
                );
            }
        }
    }

    pub fn log_rollback(&self, run_id: u64, canaries_removed: usize) {
        warn!(
            event = "deployment_rolled_back",
            lab = %self.lab_name,
            run_id = run_id,
            canaries_removed = canaries_removed,
            "Deployment rolled back"
        );
    }

    pub fn log_incident_opened(&self, incident_id: &str, incident_type: &str, target: Option<&str>) {
        warn!(
            event = "incident_opened",
            lab = %self.lab_name,
            incident_id = %incident_id,
            incident_type = %incident_type,
            target = ?target,
            "Chaos experiment injected"
        );
    }

    pub fn log_incident_resolved(&self, incident_id: &str, incident_type: &str, duration_ms: u64) {
        info!(
            event = "incident_resolved",
            lab = %self.lab_name,
            incident_id = %incident_id,
            incident_type = %incident_type,
            duration_ms = duration_ms,
            "Chaos experiment recovered"
        );
    }

    pub fn log_scenario_loaded(&self, title: &str, services: usize, stages: usize) {
        info!(
            event = "scenario_loaded",
            lab = %self.lab_name,
            title = %title,
            services = services,
            stages = stages,
            "Scenario loaded"
        );
    }

    pub fn log_scenario_rejected(&self, reason: &str) {
        warn!(
            event = "scenario_rejected",
            lab = %self.lab_name,
            reason = %reason,
            "Scenario rejected, keeping built-in seed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = LabMetrics::new();
        metrics.inc_commands_accepted();
        metrics.inc_commands_rejected();
        metrics.inc_deployments_completed();
        metrics.inc_deployments_failed();
        metrics.inc_rollbacks();
        metrics.inc_incidents_opened("latency");
        metrics.inc_incidents_resolved("latency");
        metrics.observe_stage_duration("Build", 3.2);
        metrics.inc_telemetry_ticks();
    }

    #[test]
    fn test_metrics_handles_share_state() {
        let a = LabMetrics::new();
        let b = a.clone();
        let before = a.inner().rollbacks_total.get();
        b.inc_rollbacks();
        assert!(a.inner().rollbacks_total.get() > before);
    }

    #[test]
    fn test_structured_logger() {
        let logger = StructuredLogger::new("test-lab");
        logger.log_startup("0.1.0", 7);
        logger.log_command("kubectl", true);
        logger.log_run_started(1, "canary", "v1.5.0", 10);
        logger.log_stage(1, "Build", "success", 3000);
        logger.log_run_outcome(1, "failed", "v1.5.0");
        logger.log_run_outcome(1, "completed", "v1.5.0");
        logger.log_rollback(2, 1);
        logger.log_incident_opened("INC-1001", "pod_failure", Some("homepage-abc"));
        logger.log_incident_resolved("INC-1001", "pod_failure", 5000);
        logger.log_scenario_loaded("Black Friday", 4, 5);
        logger.log_scenario_rejected("too few services");
        logger.log_shutdown("test");
    }
}
