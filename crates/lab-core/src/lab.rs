//! The lab session
//!
//! Owns the shared state, both engines, the telemetry loop, the interpreter
//! and the command history. Presentation layers only talk to this type.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chaos::ChaosEngine;
use crate::cluster::{Cluster, DEFAULT_VERSION};
use crate::config::LabConfig;
use crate::error::LabError;
use crate::events::{activity, EventBus};
use crate::models::{LogLevel, LogSource, PodStatus};
use crate::observability::{LabMetrics, StructuredLogger};
use crate::pipeline::{default_templates, PipelineEngine};
use crate::scenario::{Scenario, ScenarioError, ScenarioSource};
use crate::state::{LabSnapshot, ScenarioInfo, SharedState};
use crate::telemetry::TelemetryLoop;
use crate::terminal::{CommandError, CommandHistory, CommandOutput, Interpretation, Interpreter, LabCommand};

/// Restart count shown on pods a scenario marks as affected
const AFFECTED_POD_RESTARTS: u32 = 3;

/// Result of one terminal line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub output: CommandOutput,
    /// False for rejected input; rejected lines are not recorded
    pub accepted: bool,
}

pub struct Lab {
    config: LabConfig,
    state: Arc<SharedState>,
    events: EventBus,
    pipeline: PipelineEngine,
    chaos: ChaosEngine,
    interpreter: Interpreter,
    history: Mutex<CommandHistory>,
    /// Revision of the last history written to disk
    persisted: Mutex<u64>,
    telemetry_shutdown: broadcast::Sender<()>,
    telemetry_task: Mutex<Option<JoinHandle<()>>>,
    logger: StructuredLogger,
    metrics: LabMetrics,
    shut_down: AtomicBool,
}

impl Lab {
    pub fn new(config: LabConfig) -> Result<Self, LabError> {
        Self::named("devops-lab", config)
    }

    pub fn named(name: &str, config: LabConfig) -> Result<Self, LabError> {
        config.validate()?;

        let state = Arc::new(SharedState::new(&config));
        let events = EventBus::new(config.event_buffer);
        let logger = StructuredLogger::new(name);
        let metrics = LabMetrics::new();

        let pipeline = PipelineEngine::new(
            state.clone(),
            events.clone(),
            config.pipeline_settings(),
            logger.clone(),
            metrics.clone(),
        );
        let chaos = ChaosEngine::new(
            state.clone(),
            events.clone(),
            config.chaos_settings(),
            logger.clone(),
            metrics.clone(),
        );

        let history = match &config.history_path {
            Some(path) => CommandHistory::load(path, config.history_capacity),
            None => CommandHistory::in_memory(config.history_capacity),
        };
        let (telemetry_shutdown, _) = broadcast::channel(1);

        Ok(Self {
            config,
            state,
            events,
            pipeline,
            chaos,
            interpreter: Interpreter::new(),
            history: Mutex::new(history),
            persisted: Mutex::new(0),
            telemetry_shutdown,
            telemetry_task: Mutex::new(None),
            logger,
            metrics,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Start the telemetry loop. Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut task = self
            .telemetry_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return;
        }
        let telemetry = TelemetryLoop::new(
            self.state.clone(),
            self.config.telemetry_settings(),
            self.metrics.clone(),
        );
        *task = Some(tokio::spawn(telemetry.run(self.telemetry_shutdown.subscribe())));

        let pods = self.state.read(|s| s.cluster.pod_count());
        self.logger.log_startup(env!("CARGO_PKG_VERSION"), pods);
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn pipeline(&self) -> &PipelineEngine {
        &self.pipeline
    }

    pub fn chaos(&self) -> &ChaosEngine {
        &self.chaos
    }

    pub fn snapshot(&self) -> LabSnapshot {
        self.state.snapshot()
    }

    /// Recorded commands, oldest first
    pub fn history(&self) -> Vec<String> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries()
    }

    /// Run one line of terminal input
    pub fn execute(&self, line: &str) -> Execution {
        let snapshot = self.state.snapshot();
        let result = self
            .interpreter
            .interpret(line, &snapshot)
            .and_then(|interpretation| match interpretation {
                Interpretation::Output(output) => Ok(output),
                Interpretation::Delegate(command) => self.dispatch(command),
            });

        let verb = line.split_whitespace().next().unwrap_or_default();
        match result {
            Ok(output) => {
                self.record(line);
                self.metrics.inc_commands_accepted();
                self.logger.log_command(verb, true);
                Execution {
                    output,
                    accepted: true,
                }
            }
            Err(CommandError::Empty) => Execution {
                output: CommandOutput::Empty,
                accepted: false,
            },
            Err(e) => {
                self.metrics.inc_commands_rejected();
                self.logger.log_command(verb, false);
                debug!(error = %e, "Command rejected");
                Execution {
                    output: CommandOutput::Text(e.to_string()),
                    accepted: false,
                }
            }
        }
    }

    fn dispatch(&self, command: LabCommand) -> Result<CommandOutput, CommandError> {
        match command {
            LabCommand::Deploy(request) => {
                let (current_version, service) = self
                    .state
                    .read(|s| (s.cluster.current_version.clone(), s.cluster.primary_service.clone()));
                let config = request.resolve(&current_version, self.config.default_canary_weight);
                let run_id = self.pipeline.start(config.clone())?;
                Ok(CommandOutput::Lines(vec![
                    format!(
                        "Deploying {service} {} with {} strategy (run #{run_id})",
                        config.version_tag, config.strategy
                    ),
                    format!(
                        "Pipeline will pause at the canary gate with {}% traffic",
                        config.canary_weight()
                    ),
                ]))
            }
            LabCommand::Promote => {
                self.pipeline.promote()?;
                Ok(CommandOutput::Text("Canary promoted, rolling out to production".to_string()))
            }
            LabCommand::Rollback => {
                let removed = self.pipeline.rollback()?;
                Ok(CommandOutput::Text(format!(
                    "Rolled back: {removed} canary pod(s) removed, traffic restored"
                )))
            }
            LabCommand::Chaos(scenario) => {
                let outcome = self.chaos.trigger(scenario)?;
                let target = outcome
                    .target
                    .map(|t| format!(" on {t}"))
                    .unwrap_or_default();
                let text = if outcome.extended {
                    format!("Chaos {scenario}{target} already running, window restarted ({})", outcome.incident_id)
                } else {
                    format!("Chaos {scenario}{target} injected, incident {} opened", outcome.incident_id)
                };
                Ok(CommandOutput::Text(text))
            }
            LabCommand::AutoChaos(true) => {
                let text = if self.chaos.enable_auto_chaos()? {
                    format!(
                        "Auto-chaos enabled: a random experiment every {}s",
                        self.config.auto_chaos_interval_ms / 1000
                    )
                } else {
                    "Auto-chaos is already enabled".to_string()
                };
                Ok(CommandOutput::Text(text))
            }
            LabCommand::AutoChaos(false) => {
                let text = if self.chaos.disable_auto_chaos() {
                    "Auto-chaos disabled"
                } else {
                    "Auto-chaos is not running"
                };
                Ok(CommandOutput::Text(text.to_string()))
            }
            LabCommand::ShowHistory => {
                let lines = self
                    .history()
                    .iter()
                    .enumerate()
                    .map(|(i, cmd)| format!("{:>5}  {cmd}", i + 1))
                    .collect();
                Ok(CommandOutput::Lines(lines))
            }
        }
    }

    fn record(&self, line: &str) {
        let recorded = {
            let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            history.push(line);
            history.path().is_some().then(|| history.clone())
        };
        if let Some(recorded) = recorded {
            self.persist(&recorded);
        }
        self.events
            .publish(activity::TERMINAL_COMMAND, json!({ "command": line.trim() }));
    }

    /// Write `recorded` unless a newer revision is already on disk. Runs
    /// outside the history lock so readers never wait on file I/O.
    fn persist(&self, recorded: &CommandHistory) {
        let mut persisted = self.persisted.lock().unwrap_or_else(PoisonError::into_inner);
        if recorded.revision() <= *persisted {
            return;
        }
        match recorded.save() {
            Ok(()) => *persisted = recorded.revision(),
            Err(e) => warn!(error = %e, "Failed to persist command history"),
        }
    }

    /// Fetch, validate and apply a scenario. Nothing is applied on failure and
    /// a previously loaded scenario is replaced by the built-in seed.
    pub async fn load_scenario(&self, source: &dyn ScenarioSource) -> Result<ScenarioInfo, ScenarioError> {
        let fetched = source.fetch().await.and_then(|scenario| {
            scenario.validate()?;
            Ok(scenario)
        });

        let scenario = match fetched {
            Ok(scenario) => scenario,
            Err(e) => {
                warn!(source = %source.describe(), error = %e, "Scenario unusable, falling back to built-in seed");
                self.logger.log_scenario_rejected(&e.to_string());
                if self.state.read(|s| s.scenario.is_some()) {
                    if let Err(reset_err) = self.reset_to_builtin() {
                        debug!(error = %reset_err, "Built-in seed not restored");
                    }
                }
                return Err(e);
            }
        };

        self.apply_scenario(&scenario)?;
        self.logger.log_scenario_loaded(
            &scenario.title,
            scenario.services.len(),
            scenario.pipeline_stages.len(),
        );
        Ok(scenario.info())
    }

    fn apply_scenario(&self, scenario: &Scenario) -> Result<(), ScenarioError> {
        if !self.state.read(|s| s.pipeline.status.accepts_start()) {
            return Err(ScenarioError::Busy);
        }
        self.chaos.reset();

        let seeds = scenario.service_seeds();
        let affected = scenario.affected_services.clone();
        let info = scenario.info();
        self.state.apply(|s| {
            if !s.pipeline.status.accepts_start() {
                return Err(ScenarioError::Busy);
            }
            s.cluster = Cluster::seed(seeds, DEFAULT_VERSION, &mut s.rng);
            for pod in s.cluster.nodes.iter_mut().flat_map(|n| n.pods.iter_mut()) {
                if affected.contains(&pod.service) {
                    pod.status = PodStatus::Error;
                    pod.restarts = AFFECTED_POD_RESTARTS;
                }
            }
            s.canary = None;
            s.log(
                LogSource::System,
                LogLevel::Info,
                format!("Scenario loaded: {}", info.title),
            );
            for service in &affected {
                s.log(
                    LogSource::System,
                    LogLevel::Error,
                    format!("{service}: pods crash-looping"),
                );
            }
            s.scenario = Some(info);
            Ok(())
        })?;

        self.pipeline
            .set_templates(scenario.stage_templates())
            .map_err(|e| ScenarioError::Invalid(e.to_string()))
    }

    /// Restore the built-in cluster and stage list
    pub fn reset_to_builtin(&self) -> Result<(), ScenarioError> {
        if !self.state.read(|s| s.pipeline.status.accepts_start()) {
            return Err(ScenarioError::Busy);
        }
        self.chaos.reset();
        self.state.apply(|s| {
            s.cluster = Cluster::builtin(&mut s.rng);
            s.canary = None;
            s.scenario = None;
            s.log(LogSource::System, LogLevel::Info, "Built-in seed restored");
        });
        self.pipeline
            .set_templates(default_templates())
            .map_err(|e| ScenarioError::Invalid(e.to_string()))
    }

    /// Cancel every timer, the auto-chaos loop and the telemetry loop.
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pipeline.shutdown();
        self.chaos.shutdown();
        // no receivers when the loop was never started
        let _ = self.telemetry_shutdown.send(());
        if let Some(task) = self
            .telemetry_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        info!("Lab shut down");
        self.logger.log_shutdown("teardown");
    }
}

impl Drop for Lab {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineStatus, StageStatus};
    use crate::scenario::{tests::black_friday, StaticScenarioSource};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::sleep;

    fn config() -> LabConfig {
        LabConfig {
            stage_jitter_ms: 0,
            canary_worse_probability: 0.0,
            ..LabConfig::seeded(42)
        }
    }

    fn lab() -> Lab {
        Lab::new(config()).unwrap()
    }

    const TO_GATE: Duration = Duration::from_millis(11_100);

    #[tokio::test]
    async fn test_get_pods_lists_every_pod() {
        let lab = lab();
        let execution = lab.execute("kubectl get pods");
        assert!(execution.accepted);
        let lines = execution.output.lines();
        assert_eq!(lines.len(), lab.snapshot().cluster.pod_count() + 1);
        assert!(lines[0].starts_with("NAME"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_deploy_rejected() {
        let lab = lab();
        assert!(lab.execute("deploy --weight=30").accepted);
        sleep(Duration::from_millis(10)).await;
        let before = lab.snapshot().pipeline;

        let second = lab.execute("deploy");
        assert!(!second.accepted);
        assert!(second.output.lines()[0].contains("already in progress"));
        assert_eq!(lab.snapshot().pipeline, before);
        assert_eq!(lab.history(), vec!["deploy --weight=30"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_canary_twenty_percent() {
        let lab = lab();
        assert!(lab.execute("deploy --strategy canary --weight 20 --version v1.5.0").accepted);
        sleep(TO_GATE).await;

        let snapshot = lab.snapshot();
        assert_eq!(snapshot.pipeline.status, PipelineStatus::PausedCanary);
        let canaries: Vec<_> = snapshot.cluster.canary_pods().collect();
        assert_eq!(canaries.len(), 1);
        assert!((canaries[0].traffic_weight.unwrap() - 20.0).abs() < 1e-6);
        let stable: f64 = snapshot
            .cluster
            .primary_pods()
            .filter(|p| !p.is_canary)
            .filter_map(|p| p.traffic_weight)
            .sum();
        assert!((stable - 80.0).abs() < 1e-6);
        assert!(snapshot.canary_analysis.is_some());

        let status = lab.execute("status").output.lines();
        assert!(status.iter().any(|l| l.contains("promote")));

        assert!(lab.execute("promote").accepted);
        sleep(Duration::from_secs(4)).await;
        assert_eq!(lab.snapshot().cluster.current_version, "v1.5.0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollback_twice() {
        let lab = lab();
        lab.execute("deploy");
        sleep(TO_GATE).await;
        assert!(lab.execute("rollback").accepted);

        let second = lab.execute("rollback");
        assert!(!second.accepted);
        assert_eq!(lab.snapshot().pipeline.stages[4].status, StageStatus::Failed);
    }

    #[tokio::test]
    async fn test_one_activity_event_per_accepted_command() {
        let lab = lab();
        let mut rx = lab.events().subscribe_activity();

        lab.execute("whoami");
        lab.execute("nonsense");
        lab.execute("");
        lab.execute("cat missing");
        lab.execute("ls");

        let first = rx.try_recv().unwrap();
        assert_eq!(first.kind, activity::TERMINAL_COMMAND);
        assert_eq!(first.data["command"], "whoami");
        assert_eq!(rx.try_recv().unwrap().data["command"], "ls");
        assert!(rx.try_recv().is_err());
        assert_eq!(lab.history(), vec!["whoami", "ls"]);
    }

    #[tokio::test]
    async fn test_history_is_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.json");
        let config = LabConfig {
            history_path: Some(path.clone()),
            ..config()
        };

        {
            let lab = Lab::new(config.clone()).unwrap();
            lab.execute("kubectl get nodes");
            lab.execute("git status");
            lab.execute("bogus");
        }

        let lab = Lab::new(config).unwrap();
        assert_eq!(lab.history(), vec!["kubectl get nodes", "git status"]);
        let listing = lab.execute("history").output.lines();
        assert_eq!(listing.len(), 2);
        assert!(listing[1].ends_with("git status"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_chaos_commands() {
        let lab = lab();
        assert!(lab.execute("chaos latency").accepted);
        assert_eq!(lab.snapshot().effects.latency_injection_ms, 300);

        let unknown = lab.execute("chaos meteor");
        assert!(!unknown.accepted);
        assert!(unknown.output.lines()[0].contains("unknown chaos scenario"));

        assert!(lab.execute("chaos auto on").accepted);
        assert!(lab.chaos().auto_chaos_enabled());
        assert!(lab.execute("chaos auto off").accepted);
        assert!(!lab.chaos().auto_chaos_enabled());

        sleep(Duration::from_secs(9)).await;
        let incidents = lab.execute("incidents").output.lines();
        assert!(incidents.iter().any(|l| l.contains("Resolved")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_applies_and_falls_back() {
        let lab = lab();
        let info = lab
            .load_scenario(&StaticScenarioSource::new(black_friday()))
            .await
            .unwrap();
        assert_eq!(info.title, "Black Friday Checkout");

        let snapshot = lab.snapshot();
        assert_eq!(snapshot.cluster.primary_service, "checkout");
        assert_eq!(snapshot.pipeline.stages.len(), 5);
        assert!(snapshot
            .cluster
            .pods()
            .filter(|p| p.service == "payments")
            .all(|p| p.status == PodStatus::Error && p.restarts == 3));
        assert!(snapshot.cluster.weights_consistent());

        let mut broken = black_friday();
        broken.services.truncate(1);
        let err = lab
            .load_scenario(&StaticScenarioSource::new(broken))
            .await
            .unwrap_err();
        assert!(matches!(err, ScenarioError::Invalid(_)));

        let snapshot = lab.snapshot();
        assert_eq!(snapshot.cluster.primary_service, "homepage");
        assert_eq!(snapshot.pipeline.stages.len(), 6);
        assert!(snapshot.scenario.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_rejected_while_deploying() {
        let lab = lab();
        lab.execute("deploy");
        let err = lab
            .load_scenario(&StaticScenarioSource::new(black_friday()))
            .await
            .unwrap_err();
        assert_eq!(err, ScenarioError::Busy);
        assert_eq!(lab.snapshot().cluster.primary_service, "homepage");
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_pipeline_runs_to_gate() {
        let lab = lab();
        lab.load_scenario(&StaticScenarioSource::new(black_friday()))
            .await
            .unwrap();
        lab.execute("deploy --weight 25");
        // 1000 + 2000 + 1500 + 1000
        sleep(Duration::from_millis(5_600)).await;

        let snapshot = lab.snapshot();
        assert_eq!(snapshot.pipeline.status, PipelineStatus::PausedCanary);
        assert_eq!(snapshot.cluster.canary_pods().next().unwrap().service, "checkout");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_everything() {
        let lab = lab();
        lab.start();
        lab.execute("deploy");
        lab.execute("chaos cpu_spike");
        lab.execute("chaos auto on");
        sleep(Duration::from_secs(1)).await;

        lab.shutdown();
        let frozen = lab.snapshot();
        sleep(Duration::from_secs(60)).await;
        let later = lab.snapshot();

        assert_eq!(later.pipeline.stages, frozen.pipeline.stages);
        assert_eq!(later.telemetry.cpu.len(), frozen.telemetry.cpu.len());
        assert!(later.effects.is_quiet());
        assert_eq!(lab.pipeline().pending_timers(), 0);
        lab.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_after_shutdown_schedule_nothing() {
        let lab = lab();
        lab.start();
        lab.shutdown();
        let frozen = lab.snapshot();

        for line in ["deploy", "chaos latency", "chaos pod_failure", "chaos auto on"] {
            let execution = lab.execute(line);
            assert!(!execution.accepted, "{line} should be refused");
            assert!(execution.output.lines()[0].contains("shut down"));
        }
        assert!(lab.execute("whoami").accepted);
        assert_eq!(lab.pipeline().pending_timers(), 0);
        assert!(!lab.chaos().auto_chaos_enabled());

        sleep(Duration::from_secs(30)).await;
        let later = lab.snapshot();
        assert_eq!(later.pipeline, frozen.pipeline);
        assert!(later.effects.is_quiet());
        assert!(later.active_incidents.is_empty());
        assert!(later.incident_history.is_empty());
        assert_eq!(later.cluster.canary_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blue_green_deploy_reports_requested_weight() {
        let lab = lab();
        let execution = lab.execute("deploy --strategy blue-green --weight 30");
        assert!(execution.accepted);
        assert!(execution.output.lines()[1].contains("30% traffic"));

        sleep(TO_GATE).await;
        let snapshot = lab.snapshot();
        let green = snapshot.cluster.canary_pods().next().unwrap();
        assert_eq!(green.traffic_weight, Some(30.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_telemetry_reflects_cpu_spike() {
        let lab = lab();
        lab.start();
        lab.execute("chaos cpu_spike");
        sleep(Duration::from_secs(3)).await;

        let cpu = lab.snapshot().telemetry.cpu;
        assert!(cpu.last().unwrap().value >= 80.0);
    }
}
