//! Chaos engine
//!
//! Triggers run synchronously against the shared state and schedule their own
//! recovery on the timer set. Each recovery carries the ledger token it was
//! armed with, so a re-trigger or a teardown silently supersedes it.

use chrono::Utc;
use rand::Rng;
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{ChaosError, ChaosScenario, ChaosSettings};
use crate::events::{activity, EventBus, Notification, NotificationLevel};
use crate::models::{Incident, LogLevel, LogSource, PodStatus};
use crate::observability::{LabMetrics, StructuredLogger};
use crate::pipeline::PipelineStatus;
use crate::state::{LabState, SharedState};
use crate::timers::TimerSet;

/// Result of a trigger
#[derive(Debug, Clone, PartialEq)]
pub struct ChaosOutcome {
    pub scenario: ChaosScenario,
    pub incident_id: String,
    /// Failed pod for pod_failure
    pub target: Option<String>,
    /// The trigger restarted a window that was already open
    pub extended: bool,
}

struct ChaosInner {
    state: Arc<SharedState>,
    events: EventBus,
    settings: ChaosSettings,
    timers: TimerSet,
    auto_chaos: Mutex<Option<JoinHandle<()>>>,
    logger: StructuredLogger,
    metrics: LabMetrics,
}

#[derive(Clone)]
pub struct ChaosEngine {
    inner: Arc<ChaosInner>,
}

impl ChaosEngine {
    pub fn new(
        state: Arc<SharedState>,
        events: EventBus,
        settings: ChaosSettings,
        logger: StructuredLogger,
        metrics: LabMetrics,
    ) -> Self {
        Self {
            inner: Arc::new(ChaosInner {
                state,
                events,
                settings,
                timers: TimerSet::new(),
                auto_chaos: Mutex::new(None),
                logger,
                metrics,
            }),
        }
    }

    pub fn trigger_named(&self, name: &str) -> Result<ChaosOutcome, ChaosError> {
        let scenario = name.parse::<ChaosScenario>().map_err(|e| {
            warn!(scenario = %name, "Unknown chaos scenario");
            e
        })?;
        self.trigger(scenario)
    }

    pub fn trigger(&self, scenario: ChaosScenario) -> Result<ChaosOutcome, ChaosError> {
        match scenario {
            ChaosScenario::PodFailure => self.fail_pod(),
            ChaosScenario::Latency | ChaosScenario::CpuSpike => self.inject_effect(scenario),
        }
    }

    /// Experiments whose recovery is still pending
    pub fn active_experiments(&self) -> usize {
        self.inner.state.read(|s| s.chaos.len())
    }

    fn inject_effect(&self, scenario: ChaosScenario) -> Result<ChaosOutcome, ChaosError> {
        let key = scenario.name();
        let settings = &self.inner.settings;

        let timers = &self.inner.timers;
        let (token, outcome) = self.inner.state.apply(|s| {
            if timers.is_closed() {
                return Err(ChaosError::ShutDown);
            }
            let (incident_id, started, extended) = open_or_extend(s, key, scenario, None);
            scenario.set_effect(&mut s.effects, settings, true);
            let token = s.chaos.arm(key, incident_id.clone(), started);
            s.log(
                LogSource::Chaos,
                LogLevel::Warn,
                format!("Chaos: {scenario} injected ({incident_id})"),
            );
            let outcome = ChaosOutcome {
                scenario,
                incident_id,
                target: None,
                extended,
            };
            Ok((token, outcome))
        })?;

        let window = scenario.window(settings);
        let engine = self.clone();
        let scheduled = self.inner.timers.spawn(token, async move {
            sleep(window).await;
            engine.recover_effect(scenario, token);
        });
        if !scheduled {
            return Err(ChaosError::ShutDown);
        }
        self.announce(&outcome);
        Ok(outcome)
    }

    fn recover_effect(&self, scenario: ChaosScenario, token: u64) {
        let key = scenario.name();
        let settings = &self.inner.settings;

        let resolved = self.inner.state.apply(|s| {
            let entry = s.chaos.disarm(key, token)?;
            scenario.set_effect(&mut s.effects, settings, false);
            let elapsed_ms = entry.started.elapsed().as_millis() as u64;
            let incident = s.incidents.resolve(&entry.incident_id, elapsed_ms)?;
            s.log(
                LogSource::Chaos,
                LogLevel::Info,
                format!("Chaos: {scenario} recovered after {elapsed_ms}ms"),
            );
            Some(incident)
        });

        match resolved {
            Some(incident) => self.finish(&incident),
            None => debug!(scenario = %scenario, token, "Superseded recovery ignored"),
        }
    }

    fn fail_pod(&self) -> Result<ChaosOutcome, ChaosError> {
        let timers = &self.inner.timers;
        let picked = self.inner.state.apply(|s| {
            if timers.is_closed() {
                return Err(ChaosError::ShutDown);
            }
            let names = s.cluster.pod_names();
            if names.is_empty() {
                return Ok(None);
            }
            let name = names[s.rng.gen_range(0..names.len())].clone();
            if let Some(pod) = s.cluster.pod_mut(&name) {
                pod.status = PodStatus::Error;
            }

            let key = pod_key(&name);
            let (incident_id, started, extended) =
                open_or_extend(s, &key, ChaosScenario::PodFailure, Some(name.clone()));
            let token = s.chaos.arm(&key, incident_id.clone(), started);
            s.log(
                LogSource::Chaos,
                LogLevel::Error,
                format!("Chaos: pod {name} killed ({incident_id})"),
            );
            let outcome = ChaosOutcome {
                scenario: ChaosScenario::PodFailure,
                incident_id,
                target: Some(name),
                extended,
            };
            Ok(Some((key, token, outcome)))
        })?;

        let Some((key, token, outcome)) = picked else {
            warn!("No pods available for pod_failure");
            return Err(ChaosError::NoPods);
        };

        let pending_delay = self.inner.settings.pod_pending_delay;
        let recovery_delay = self.inner.settings.pod_recovery_delay;
        let pod_name = outcome.target.clone().unwrap_or_default();
        let engine = self.clone();
        let scheduled = self.inner.timers.spawn(token, async move {
            sleep(pending_delay).await;
            if !engine.pod_pending(&key, token, &pod_name) {
                return;
            }
            sleep(recovery_delay).await;
            engine.recover_pod(&key, token, &pod_name);
        });
        if !scheduled {
            return Err(ChaosError::ShutDown);
        }
        self.announce(&outcome);
        Ok(outcome)
    }

    fn pod_pending(&self, key: &str, token: u64, pod_name: &str) -> bool {
        self.inner.state.apply(|s| {
            if !s.chaos.is_current(key, token) {
                return false;
            }
            if let Some(pod) = s.cluster.pod_mut(pod_name) {
                pod.status = PodStatus::Pending;
            }
            true
        })
    }

    fn recover_pod(&self, key: &str, token: u64, pod_name: &str) {
        let resolved = self.inner.state.apply(|s| {
            let entry = s.chaos.disarm(key, token)?;
            // a canary keeps its role only while its rollout is still in flight
            let rollout_live = matches!(
                s.pipeline.status,
                PipelineStatus::PausedCanary | PipelineStatus::Deploying
            );
            if s.cluster.reassign_ip(pod_name, &mut s.rng).is_some() {
                if let Some(pod) = s.cluster.pod_mut(pod_name) {
                    pod.status = PodStatus::Running;
                    pod.restarts += 1;
                    pod.is_canary = pod.is_canary && rollout_live;
                }
                s.log(
                    LogSource::Chaos,
                    LogLevel::Info,
                    format!("Chaos: pod {pod_name} restarted"),
                );
            } else {
                s.log(
                    LogSource::Chaos,
                    LogLevel::Info,
                    format!("Chaos: pod {pod_name} is gone, closing incident"),
                );
            }
            let elapsed_ms = entry.started.elapsed().as_millis() as u64;
            s.incidents.resolve(&entry.incident_id, elapsed_ms)
        });

        if let Some(incident) = resolved {
            self.finish(&incident);
        }
    }

    fn announce(&self, outcome: &ChaosOutcome) {
        if outcome.extended {
            info!(scenario = %outcome.scenario, incident_id = %outcome.incident_id, "Chaos window restarted");
            return;
        }
        let kind = outcome.scenario.incident_type().to_string();
        self.inner.metrics.inc_incidents_opened(outcome.scenario.name());
        self.inner
            .logger
            .log_incident_opened(&outcome.incident_id, outcome.scenario.name(), outcome.target.as_deref());
        let message = match &outcome.target {
            Some(target) => format!("{} on {target} ({})", kind, outcome.incident_id),
            None => format!("{} injected ({})", kind, outcome.incident_id),
        };
        self.inner.events.notify(Notification::new(
            NotificationLevel::Warning,
            "Incident opened",
            message,
        ));
    }

    fn finish(&self, incident: &Incident) {
        let duration_ms = incident.duration_observed_ms.unwrap_or_default();
        let kind = incident.incident_type;
        let type_name = serde_json::to_value(kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| kind.to_string());

        self.inner.metrics.inc_incidents_resolved(&type_name);
        self.inner
            .logger
            .log_incident_resolved(&incident.id, &type_name, duration_ms);
        self.inner.events.publish(
            activity::CHAOS_RESOLVED,
            json!({
                "incident_id": incident.id,
                "type": type_name,
                "target": incident.target,
                "duration_ms": duration_ms,
            }),
        );
        self.inner.events.notify(Notification::new(
            NotificationLevel::Success,
            "Incident resolved",
            format!("{} resolved after {:.1}s", incident.id, duration_ms as f64 / 1000.0),
        ));
    }

    /// Start periodic random experiments. Returns false if already running.
    pub fn enable_auto_chaos(&self) -> Result<bool, ChaosError> {
        let mut slot = self
            .inner
            .auto_chaos
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.inner.timers.is_closed() {
            return Err(ChaosError::ShutDown);
        }
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(false);
        }

        let period = self.inner.settings.auto_chaos_interval;
        let engine = self.clone();
        *slot = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let scenario = engine
                    .inner
                    .state
                    .apply(|s| ChaosScenario::ALL[s.rng.gen_range(0..ChaosScenario::ALL.len())]);
                debug!(scenario = %scenario, "Auto-chaos firing");
                if let Err(e) = engine.trigger(scenario) {
                    debug!(error = %e, "Auto-chaos trigger skipped");
                }
            }
        }));

        info!(interval_ms = period.as_millis() as u64, "Auto-chaos enabled");
        self.inner.state.apply(|s| {
            s.log(LogSource::Chaos, LogLevel::Info, "Auto-chaos enabled");
        });
        Ok(true)
    }

    /// Stop periodic experiments. Returns false if it was not running.
    pub fn disable_auto_chaos(&self) -> bool {
        let handle = self
            .inner
            .auto_chaos
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handle {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                info!("Auto-chaos disabled");
                self.inner.state.apply(|s| {
                    s.log(LogSource::Chaos, LogLevel::Info, "Auto-chaos disabled");
                });
                true
            }
            _ => false,
        }
    }

    pub fn auto_chaos_enabled(&self) -> bool {
        self.inner
            .auto_chaos
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Abort pending recoveries and clear every effect. Open incidents are
    /// dropped unresolved; experiments triggered after the reset are kept.
    pub fn reset(&self) {
        let fence = self.inner.state.apply(|s| {
            let fence = s.chaos.fence();
            s.chaos.clear();
            s.effects = Default::default();
            s.incidents.abandon_active();
            fence
        });
        let aborted = self.inner.timers.cancel_before(fence);
        debug!(aborted, "Chaos experiments reset");
    }

    /// Refuse further experiments, stop auto-chaos and reset
    pub fn shutdown(&self) {
        self.inner.timers.close();
        self.disable_auto_chaos();
        self.reset();
    }
}

fn pod_key(name: &str) -> String {
    format!("pod:{name}")
}

/// Reuse the open incident of an in-flight experiment on `key`, or open one
fn open_or_extend(
    s: &mut LabState,
    key: &str,
    scenario: ChaosScenario,
    target: Option<String>,
) -> (String, Instant, bool) {
    match s.chaos.current(key) {
        Some(in_flight) => (in_flight.incident_id.clone(), in_flight.started, true),
        None => {
            let incident = s.incidents.open(scenario.incident_type(), target, Utc::now());
            (incident.id, Instant::now(), false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LabConfig;
    use crate::models::IncidentStatus;
    use std::time::Duration;

    fn engine() -> (ChaosEngine, Arc<SharedState>, EventBus) {
        let state = Arc::new(SharedState::new(&LabConfig::seeded(21)));
        let events = EventBus::new(64);
        let engine = ChaosEngine::new(
            state.clone(),
            events.clone(),
            ChaosSettings::default(),
            StructuredLogger::new("test"),
            LabMetrics::new(),
        );
        (engine, state, events)
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_window() {
        let (engine, state, events) = engine();
        let mut activity_rx = events.subscribe_activity();

        let outcome = engine.trigger(ChaosScenario::Latency).unwrap();
        assert!(!outcome.extended);
        assert_eq!(state.read(|s| s.effects.latency_injection_ms), 300);
        assert_eq!(state.read(|s| s.incidents.active().len()), 1);

        sleep(Duration::from_millis(7_900)).await;
        assert_eq!(state.read(|s| s.effects.latency_injection_ms), 300);

        sleep(Duration::from_millis(200)).await;
        let snapshot = state.snapshot();
        assert_eq!(snapshot.effects.latency_injection_ms, 0);
        assert!(snapshot.active_incidents.is_empty());
        let resolved = &snapshot.incident_history[0];
        assert_eq!(resolved.status, IncidentStatus::Resolved);
        assert_eq!(resolved.duration_observed_ms, Some(8_000));

        let event = activity_rx.try_recv().unwrap();
        assert_eq!(event.kind, activity::CHAOS_RESOLVED);
        assert_eq!(event.data["type"], "latency");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cpu_spike_window() {
        let (engine, state, _events) = engine();
        engine.trigger_named("cpu-spike").unwrap();
        assert_eq!(state.read(|s| s.effects.cpu_spike_percent), 80);

        sleep(Duration::from_millis(10_100)).await;
        assert_eq!(state.read(|s| s.effects.cpu_spike_percent), 0);
        assert_eq!(state.read(|s| s.incidents.history().len()), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrigger_restarts_window_without_stacking() {
        let (engine, state, _events) = engine();
        let first = engine.trigger(ChaosScenario::Latency).unwrap();

        sleep(Duration::from_secs(5)).await;
        let second = engine.trigger(ChaosScenario::Latency).unwrap();
        assert!(second.extended);
        assert_eq!(second.incident_id, first.incident_id);
        assert_eq!(state.read(|s| s.effects.latency_injection_ms), 300);

        // first window would have closed at t=8s
        sleep(Duration::from_secs(4)).await;
        assert_eq!(state.read(|s| s.effects.latency_injection_ms), 300);

        sleep(Duration::from_millis(4_100)).await;
        let snapshot = state.snapshot();
        assert_eq!(snapshot.effects.latency_injection_ms, 0);
        assert_eq!(snapshot.incident_history.len(), 1);
        assert_eq!(snapshot.incident_history[0].duration_observed_ms, Some(13_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pod_failure_lifecycle() {
        let (engine, state, _events) = engine();
        let outcome = engine.trigger(ChaosScenario::PodFailure).unwrap();
        let name = outcome.target.clone().unwrap();
        let original = state.read(|s| s.cluster.find_pod(&name).map(|(_, p)| p.clone())).unwrap();

        let status = |state: &SharedState| {
            state.read(|s| s.cluster.find_pod(&name).map(|(_, p)| p.status))
        };
        assert_eq!(status(&state), Some(PodStatus::Error));

        sleep(Duration::from_millis(2_100)).await;
        assert_eq!(status(&state), Some(PodStatus::Pending));

        sleep(Duration::from_millis(3_000)).await;
        let recovered = state.read(|s| s.cluster.find_pod(&name).map(|(_, p)| p.clone())).unwrap();
        assert_eq!(recovered.status, PodStatus::Running);
        assert_ne!(recovered.ip, original.ip);
        assert_eq!(recovered.restarts, original.restarts + 1);
        assert!(!recovered.is_canary);

        let snapshot = state.snapshot();
        assert!(snapshot.active_incidents.is_empty());
        assert_eq!(snapshot.incident_history[0].target.as_deref(), Some(name.as_str()));
        assert!(snapshot.cluster.weights_consistent());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pod_failure_on_vanished_pod_still_resolves() {
        let (engine, state, _events) = engine();
        let outcome = engine.trigger(ChaosScenario::PodFailure).unwrap();
        let name = outcome.target.unwrap();

        state.apply(|s| {
            for node in &mut s.cluster.nodes {
                node.pods.retain(|p| p.name != name);
            }
        });

        sleep(Duration::from_secs(6)).await;
        let snapshot = state.snapshot();
        assert!(snapshot.active_incidents.is_empty());
        assert_eq!(snapshot.incident_history.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_pods() {
        let (engine, state, _events) = engine();
        state.apply(|s| s.cluster.nodes.iter_mut().for_each(|n| n.pods.clear()));
        assert_eq!(engine.trigger(ChaosScenario::PodFailure), Err(ChaosError::NoPods));
        assert!(state.read(|s| s.incidents.active().is_empty()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_scenario() {
        let (engine, state, _events) = engine();
        let before = state.snapshot();
        assert!(matches!(
            engine.trigger_named("meteor"),
            Err(ChaosError::UnknownScenario(_))
        ));
        let after = state.snapshot();
        assert_eq!(after.effects, before.effects);
        assert_eq!(after.active_incidents, before.active_incidents);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_chaos_is_idempotent() {
        let (engine, state, _events) = engine();
        assert!(engine.enable_auto_chaos().unwrap());
        assert!(!engine.enable_auto_chaos().unwrap());
        assert!(engine.auto_chaos_enabled());

        // nothing fires before the first interval
        sleep(Duration::from_secs(19)).await;
        assert_eq!(state.read(|s| s.incidents.active().len()), 0);

        sleep(Duration::from_secs(2)).await;
        let opened = state.read(|s| s.incidents.active().len() + s.incidents.history().len());
        assert_eq!(opened, 1);

        assert!(engine.disable_auto_chaos());
        assert!(!engine.disable_auto_chaos());
        assert!(!engine.auto_chaos_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_clears_effects_and_recoveries() {
        let (engine, state, _events) = engine();
        engine.trigger(ChaosScenario::Latency).unwrap();
        engine.trigger(ChaosScenario::CpuSpike).unwrap();
        engine.enable_auto_chaos().unwrap();

        engine.shutdown();
        assert!(state.read(|s| s.effects.is_quiet()));
        assert_eq!(engine.active_experiments(), 0);
        assert!(!engine.auto_chaos_enabled());

        sleep(Duration::from_secs(60)).await;
        assert!(state.read(|s| s.incidents.history().is_empty()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_refuses_new_experiments() {
        let (engine, state, _events) = engine();
        engine.shutdown();

        assert_eq!(engine.trigger(ChaosScenario::Latency), Err(ChaosError::ShutDown));
        assert_eq!(engine.trigger(ChaosScenario::PodFailure), Err(ChaosError::ShutDown));
        assert_eq!(engine.enable_auto_chaos(), Err(ChaosError::ShutDown));
        assert!(!engine.auto_chaos_enabled());

        let snapshot = state.snapshot();
        assert!(snapshot.effects.is_quiet());
        assert!(snapshot.active_incidents.is_empty());
        assert!(snapshot.cluster.pods().all(|p| p.status == PodStatus::Running));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_keeps_later_recoveries() {
        let (engine, state, _events) = engine();
        engine.trigger(ChaosScenario::Latency).unwrap();
        engine.reset();
        assert!(state.read(|s| s.effects.is_quiet()));

        engine.trigger(ChaosScenario::CpuSpike).unwrap();
        engine.reset();
        engine.trigger(ChaosScenario::Latency).unwrap();
        assert_eq!(engine.inner.timers.pending(), 1);

        sleep(Duration::from_millis(8_100)).await;
        let snapshot = state.snapshot();
        assert!(snapshot.effects.is_quiet());
        assert_eq!(snapshot.incident_history.len(), 1);
        assert_eq!(snapshot.incident_history[0].status, IncidentStatus::Resolved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_canary_keeps_its_role_at_the_gate() {
        let (engine, state, _events) = engine();
        let canary = state.apply(|s| {
            let name = s.cluster.add_canary("v1.5.0", 20.0, &mut s.rng);
            s.pipeline.status = PipelineStatus::PausedCanary;
            if let Some(pod) = s.cluster.pod_mut(&name) {
                pod.status = PodStatus::Error;
            }
            let key = pod_key(&name);
            let incident = s.incidents.open(ChaosScenario::PodFailure.incident_type(), Some(name.clone()), Utc::now());
            let token = s.chaos.arm(&key, incident.id, Instant::now());
            (name, key, token)
        });
        let (name, key, token) = canary;

        assert!(engine.pod_pending(&key, token, &name));
        engine.recover_pod(&key, token, &name);

        let snapshot = state.snapshot();
        assert_eq!(snapshot.pipeline.status, PipelineStatus::PausedCanary);
        assert_eq!(snapshot.cluster.canary_count(), 1);
        let (_, pod) = snapshot.cluster.find_pod(&name).unwrap();
        assert!(pod.is_canary);
        assert_eq!(pod.status, PodStatus::Running);
        assert_eq!(pod.restarts, 1);
        assert!(snapshot.cluster.weights_consistent());
        assert!(snapshot.active_incidents.is_empty());
    }
}
