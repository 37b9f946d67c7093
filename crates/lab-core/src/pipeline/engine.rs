//! Pipeline engine
//!
//! Stage progression runs as timer tasks. Every callback carries the run id it
//! was scheduled for and its state update is a pure function over `LabState`
//! that turns into a no-op once that run has been superseded.

use chrono::Utc;
use rand::Rng;
use serde_json::json;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::stage::{default_templates, StageEvent, StageStatus, StageTemplate};
use super::{DeployConfig, PipelineError, PipelineRun, PipelineSettings, PipelineStatus};
use crate::canary::CanaryMetrics;
use crate::events::{activity, EventBus, Notification, NotificationLevel};
use crate::models::{DeploymentRecord, LogLevel, LogSource};
use crate::observability::{LabMetrics, StructuredLogger};
use crate::state::{LabState, SharedState};
use crate::timers::TimerSet;

/// Pre-rolled outcome of one stage
#[derive(Debug, Clone, PartialEq)]
pub struct StagePlan {
    pub index: usize,
    pub name: String,
    pub duration: Duration,
    pub succeeds: bool,
}

impl StagePlan {
    fn roll<R: Rng + ?Sized>(index: usize, template: &StageTemplate, settings: &PipelineSettings, rng: &mut R) -> Self {
        let jitter_ms = settings.stage_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 { 0 } else { rng.gen_range(0..=jitter_ms) };
        let random_failure = settings.stage_failure_rate > 0.0 && rng.gen_bool(settings.stage_failure_rate.min(1.0));
        Self {
            index,
            name: template.name.clone(),
            duration: Duration::from_millis(template.base_duration_ms + jitter),
            succeeds: !template.forced_failure && !random_failure,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Run superseded or stage no longer in flight; nothing changed
    Stale,
    Advanced,
    Failed { stage: String },
    /// Canary gate opened
    ReachedGate { canary_pod: String, version: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProductionOutcome {
    Stale,
    Failed { stage: String },
    Completed { version: String },
}

/// Mark stage `index` of `run_id` in progress. False when the run is stale.
pub fn begin_stage(state: &mut LabState, run_id: u64, index: usize) -> bool {
    if state.pipeline.run_id != run_id || state.pipeline.status != PipelineStatus::Deploying {
        return false;
    }
    let Some(stage) = state.pipeline.stages.get_mut(index) else {
        return false;
    };
    if !stage.apply(StageEvent::Start) {
        return false;
    }
    let line = format!("[{}] $ {}", stage.name, stage.details_command);
    state.log(LogSource::Pipeline, LogLevel::Info, line);
    true
}

/// Finish one stage before the gate
pub fn complete_stage(
    state: &mut LabState,
    run_id: u64,
    plan: &StagePlan,
    observed: Duration,
    worse_probability: f64,
) -> StageOutcome {
    if state.pipeline.run_id != run_id || state.pipeline.status != PipelineStatus::Deploying {
        return StageOutcome::Stale;
    }
    let gate = state.pipeline.canary_index();
    let Some(stage) = state.pipeline.stages.get_mut(plan.index) else {
        return StageOutcome::Stale;
    };
    if stage.status != StageStatus::InProgress {
        return StageOutcome::Stale;
    }
    stage.observed_duration_ms = Some(observed.as_millis() as u64);

    if !plan.succeeds {
        stage.apply(StageEvent::Fail);
        let name = stage.name.clone();
        state.pipeline.status = PipelineStatus::Failed;
        state.log(LogSource::Pipeline, LogLevel::Error, format!("[{name}] stage failed"));
        return StageOutcome::Failed { stage: name };
    }

    stage.apply(StageEvent::Succeed);
    let name = stage.name.clone();
    let lines = stage.log_output.clone();
    for line in lines {
        state.log(LogSource::Pipeline, LogLevel::Info, format!("[{name}] {line}"));
    }

    if plan.index != gate {
        return StageOutcome::Advanced;
    }

    let Some(config) = state.pipeline.config.clone() else {
        return StageOutcome::Stale;
    };
    let canary_pod = state
        .cluster
        .add_canary(&config.version_tag, config.canary_weight(), &mut state.rng);
    state.canary = Some(CanaryMetrics::generate(&mut state.rng, worse_probability));
    state.pipeline.status = PipelineStatus::PausedCanary;
    state.log(
        LogSource::Pipeline,
        LogLevel::Warn,
        format!(
            "Canary {canary_pod} live at {}% traffic, awaiting promote or rollback",
            config.canary_weight()
        ),
    );
    StageOutcome::ReachedGate {
        canary_pod,
        version: config.version_tag,
    }
}

/// Finish the production stage started by promote
pub fn complete_production(
    state: &mut LabState,
    run_id: u64,
    plan: &StagePlan,
    observed: Duration,
) -> ProductionOutcome {
    if state.pipeline.run_id != run_id || state.pipeline.status != PipelineStatus::Deploying {
        return ProductionOutcome::Stale;
    }
    let Some(stage) = state.pipeline.stages.get_mut(plan.index) else {
        return ProductionOutcome::Stale;
    };
    if stage.status != StageStatus::InProgress {
        return ProductionOutcome::Stale;
    }
    stage.observed_duration_ms = Some(observed.as_millis() as u64);

    if !plan.succeeds {
        stage.apply(StageEvent::Fail);
        let name = stage.name.clone();
        state.pipeline.status = PipelineStatus::Failed;
        state.cluster.remove_canaries();
        state.canary = None;
        state.log(
            LogSource::Pipeline,
            LogLevel::Error,
            format!("[{name}] stage failed, canary withdrawn"),
        );
        return ProductionOutcome::Failed { stage: name };
    }

    stage.apply(StageEvent::Succeed);
    let name = stage.name.clone();
    let lines = stage.log_output.clone();
    for line in lines {
        state.log(LogSource::Pipeline, LogLevel::Info, format!("[{name}] {line}"));
    }

    let Some(config) = state.pipeline.config.clone() else {
        return ProductionOutcome::Stale;
    };
    state.cluster.promote(&config.version_tag, &mut state.rng);
    state.canary = None;
    state.telemetry.record_deployment(DeploymentRecord {
        version: config.version_tag.clone(),
        strategy: config.strategy,
        completed_at: Utc::now(),
    });
    state.pipeline.status = PipelineStatus::Completed;
    state.log(
        LogSource::Pipeline,
        LogLevel::Info,
        format!("Deployment of {} completed", config.version_tag),
    );
    ProductionOutcome::Completed {
        version: config.version_tag,
    }
}

struct PipelineInner {
    state: Arc<SharedState>,
    events: EventBus,
    settings: PipelineSettings,
    templates: RwLock<Vec<StageTemplate>>,
    timers: TimerSet,
    logger: StructuredLogger,
    metrics: LabMetrics,
}

#[derive(Clone)]
pub struct PipelineEngine {
    inner: Arc<PipelineInner>,
}

impl PipelineEngine {
    pub fn new(
        state: Arc<SharedState>,
        events: EventBus,
        settings: PipelineSettings,
        logger: StructuredLogger,
        metrics: LabMetrics,
    ) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                state,
                events,
                settings,
                templates: RwLock::new(default_templates()),
                timers: TimerSet::new(),
                logger,
                metrics,
            }),
        }
    }

    pub fn templates(&self) -> Vec<StageTemplate> {
        self.inner
            .templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the stage list used by later runs. Needs at least a canary
    /// gate and a production stage.
    pub fn set_templates(&self, templates: Vec<StageTemplate>) -> Result<(), PipelineError> {
        if templates.len() < 2 {
            return Err(PipelineError::InvalidConfig(format!(
                "a pipeline needs at least 2 stages, got {}",
                templates.len()
            )));
        }
        let service = self.inner.state.read(|s| s.cluster.primary_service.clone());
        *self
            .inner
            .templates
            .write()
            .unwrap_or_else(PoisonError::into_inner) = templates.clone();
        self.inner.state.apply(|s| {
            if s.pipeline.status.accepts_start() {
                let run_id = s.pipeline.run_id;
                s.pipeline = PipelineRun::idle(&templates, &service);
                s.pipeline.run_id = run_id;
            }
        });
        Ok(())
    }

    pub fn status(&self) -> PipelineStatus {
        self.inner.state.read(|s| s.pipeline.status)
    }

    /// Stage callbacks still scheduled
    pub fn pending_timers(&self) -> usize {
        self.inner.timers.pending()
    }

    /// Start a run. Returns the new run id.
    pub fn start(&self, config: DeployConfig) -> Result<u64, PipelineError> {
        config.validate()?;
        let templates = self.templates();
        let settings = self.inner.settings.clone();

        let timers = &self.inner.timers;
        let started = self.inner.state.apply(|s| {
            if timers.is_closed() {
                return Err(PipelineError::ShutDown);
            }
            if !s.pipeline.status.accepts_start() {
                return Err(PipelineError::AlreadyInProgress {
                    status: s.pipeline.status,
                });
            }
            // leftovers from a failed run
            s.cluster.remove_canaries();
            s.canary = None;

            let run_id = s.pipeline.run_id + 1;
            let service = s.cluster.primary_service.clone();
            s.pipeline = PipelineRun::begin(run_id, &templates, &service, config.clone());
            let gate = s.pipeline.canary_index();
            let plans: Vec<StagePlan> = templates
                .iter()
                .enumerate()
                .take(gate + 1)
                .map(|(i, t)| StagePlan::roll(i, t, &settings, &mut s.rng))
                .collect();
            s.log(
                LogSource::Pipeline,
                LogLevel::Info,
                format!(
                    "Deploying {} {} with {} strategy",
                    service, config.version_tag, config.strategy
                ),
            );
            Ok((run_id, plans))
        });

        let (run_id, plans) = match started {
            Ok(started) => started,
            Err(e) => {
                warn!(error = %e, "Rejected deployment start");
                return Err(e);
            }
        };

        self.inner.logger.log_run_started(
            run_id,
            &config.strategy.to_string(),
            &config.version_tag,
            config.traffic_weight_percent,
        );
        let engine = self.clone();
        if !self.inner.timers.spawn(run_id, engine.drive_to_gate(run_id, plans)) {
            debug!(run_id, "Lab shut down before the run could be scheduled");
            return Err(PipelineError::ShutDown);
        }
        Ok(run_id)
    }

    /// Leave the canary gate and run the production stage
    pub fn promote(&self) -> Result<(), PipelineError> {
        let templates = self.templates();
        let settings = self.inner.settings.clone();

        let timers = &self.inner.timers;
        let promoted = self.inner.state.apply(|s| {
            if timers.is_closed() {
                return Err(PipelineError::ShutDown);
            }
            if s.pipeline.status != PipelineStatus::PausedCanary {
                return Err(PipelineError::InvalidTransition {
                    action: "promote",
                    status: s.pipeline.status,
                });
            }
            let index = s.pipeline.production_index();
            let template = templates.get(index).cloned().unwrap_or_else(|| {
                StageTemplate::new(&s.pipeline.stages[index].name, 2_500, "", &[])
            });
            let plan = StagePlan::roll(index, &template, &settings, &mut s.rng);
            s.pipeline.status = PipelineStatus::Deploying;
            s.log(LogSource::Pipeline, LogLevel::Info, "Canary promoted, rolling out to production");
            Ok((s.pipeline.run_id, plan))
        });

        let (run_id, plan) = match promoted {
            Ok(promoted) => promoted,
            Err(e) => {
                warn!(error = %e, "Rejected promote");
                return Err(e);
            }
        };

        info!(run_id, "Promoting canary");
        let engine = self.clone();
        if !self.inner.timers.spawn(run_id, engine.drive_production(run_id, plan)) {
            debug!(run_id, "Lab shut down before promotion could be scheduled");
            return Err(PipelineError::ShutDown);
        }
        Ok(())
    }

    /// Abandon the current run. Returns the number of canary pods removed.
    pub fn rollback(&self) -> Result<usize, PipelineError> {
        let timers = &self.inner.timers;
        let rolled_back = self.inner.state.apply(|s| {
            if timers.is_closed() {
                return Err(PipelineError::ShutDown);
            }
            if !matches!(
                s.pipeline.status,
                PipelineStatus::PausedCanary | PipelineStatus::Deploying
            ) {
                return Err(PipelineError::InvalidTransition {
                    action: "rollback",
                    status: s.pipeline.status,
                });
            }
            s.pipeline.run_id += 1;
            let removed = s.cluster.remove_canaries();
            s.canary = None;

            let gate = s.pipeline.canary_index();
            for (i, stage) in s.pipeline.stages.iter_mut().enumerate() {
                if i == gate || stage.status == StageStatus::InProgress {
                    stage.apply(StageEvent::Abort);
                }
            }
            s.pipeline.status = PipelineStatus::Idle;
            s.log(
                LogSource::Pipeline,
                LogLevel::Warn,
                format!("Rollback complete, {removed} canary pod(s) removed"),
            );
            Ok((s.pipeline.run_id, removed))
        });

        let (run_id, removed) = match rolled_back {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Rejected rollback");
                return Err(e);
            }
        };

        // a run started after this rollback has a higher id and keeps its driver
        self.inner.timers.cancel_before(run_id);
        self.inner.metrics.inc_rollbacks();
        self.inner.logger.log_rollback(run_id, removed);
        self.inner.events.notify(Notification::new(
            NotificationLevel::Warning,
            "Rolled back",
            "Canary removed and traffic restored to the stable version",
        ));
        Ok(removed)
    }

    /// Abort every pending stage callback, refuse new runs and invalidate
    /// the current one
    pub fn shutdown(&self) {
        let aborted = self.inner.timers.close();
        self.inner.state.apply(|s| s.pipeline.run_id += 1);
        debug!(aborted, "Pipeline timers cancelled");
    }

    async fn drive_to_gate(self, run_id: u64, plans: Vec<StagePlan>) {
        let worse_probability = self.inner.settings.canary_worse_probability;

        for plan in plans {
            if !self.inner.state.apply(|s| begin_stage(s, run_id, plan.index)) {
                debug!(run_id, stage = %plan.name, "Run superseded before stage start");
                return;
            }
            let started = Instant::now();
            sleep(plan.duration).await;
            let observed = started.elapsed();

            let outcome = self
                .inner
                .state
                .apply(|s| complete_stage(s, run_id, &plan, observed, worse_probability));
            match outcome {
                StageOutcome::Stale => {
                    debug!(run_id, stage = %plan.name, "Dropping stale stage completion");
                    return;
                }
                StageOutcome::Advanced => {
                    self.record_stage(run_id, &plan, "success", observed);
                }
                StageOutcome::Failed { stage } => {
                    self.record_stage(run_id, &plan, "failed", observed);
                    self.inner.metrics.inc_deployments_failed();
                    let version = self.current_version();
                    self.inner.logger.log_run_outcome(run_id, "failed", &version);
                    self.inner.events.notify(Notification::new(
                        NotificationLevel::Error,
                        "Deployment failed",
                        format!("Stage {stage} failed"),
                    ));
                    return;
                }
                StageOutcome::ReachedGate { canary_pod, version } => {
                    self.record_stage(run_id, &plan, "success", observed);
                    self.inner.logger.log_run_outcome(run_id, "paused_canary", &version);
                    self.inner.events.notify(Notification::new(
                        NotificationLevel::Info,
                        "Canary awaiting decision",
                        format!("{canary_pod} is live with {version}; run promote or rollback"),
                    ));
                    return;
                }
            }
        }
    }

    async fn drive_production(self, run_id: u64, plan: StagePlan) {
        if !self.inner.state.apply(|s| begin_stage(s, run_id, plan.index)) {
            return;
        }
        let started = Instant::now();
        sleep(plan.duration).await;
        let observed = started.elapsed();

        let outcome = self
            .inner
            .state
            .apply(|s| complete_production(s, run_id, &plan, observed));
        match outcome {
            ProductionOutcome::Stale => {
                debug!(run_id, "Dropping stale production completion");
            }
            ProductionOutcome::Failed { stage } => {
                self.record_stage(run_id, &plan, "failed", observed);
                self.inner.metrics.inc_deployments_failed();
                let version = self.current_version();
                self.inner.logger.log_run_outcome(run_id, "failed", &version);
                self.inner.events.notify(Notification::new(
                    NotificationLevel::Error,
                    "Deployment failed",
                    format!("Stage {stage} failed"),
                ));
            }
            ProductionOutcome::Completed { version } => {
                self.record_stage(run_id, &plan, "success", observed);
                self.inner.metrics.inc_deployments_completed();
                self.inner.logger.log_run_outcome(run_id, "completed", &version);
                let strategy = self
                    .inner
                    .state
                    .read(|s| s.pipeline.config.as_ref().map(|c| c.strategy.to_string()))
                    .unwrap_or_default();
                self.inner.events.notify(Notification::new(
                    NotificationLevel::Success,
                    "Deployment completed",
                    format!("{version} is live"),
                ));
                self.inner.events.publish(
                    activity::DEPLOYMENT_COMPLETED,
                    json!({ "version": version, "strategy": strategy }),
                );
                self.inner.state.apply(|s| {
                    if s.pipeline.run_id == run_id && s.pipeline.status == PipelineStatus::Completed {
                        s.pipeline.status = PipelineStatus::Idle;
                    }
                });
            }
        }
    }

    fn record_stage(&self, run_id: u64, plan: &StagePlan, status: &str, observed: Duration) {
        self.inner
            .metrics
            .observe_stage_duration(&plan.name, observed.as_secs_f64());
        self.inner
            .logger
            .log_stage(run_id, &plan.name, status, observed.as_millis() as u64);
    }

    fn current_version(&self) -> String {
        self.inner
            .state
            .read(|s| s.pipeline.version().map(str::to_string))
            .unwrap_or_default()
    }
}
