//! Telemetry tick loop
//!
//! Periodically advances the dashboard series. The tick reads the simulation
//! effects and writes the new points inside one state transaction, so it never
//! observes a half-applied chaos change.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::observability::LabMetrics;
use crate::state::SharedState;

/// Configuration for the telemetry loop
#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    /// Interval between ticks (default: 2 seconds)
    pub interval: Duration,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
        }
    }
}

pub struct TelemetryLoop {
    state: Arc<SharedState>,
    settings: TelemetrySettings,
    metrics: LabMetrics,
}

impl TelemetryLoop {
    pub fn new(state: Arc<SharedState>, settings: TelemetrySettings, metrics: LabMetrics) -> Self {
        Self {
            state,
            settings,
            metrics,
        }
    }

    /// Run until the shutdown signal fires
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_ms = self.settings.interval.as_millis() as u64,
            "Starting telemetry loop"
        );

        let mut ticker = interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick();
                    ticks += 1;
                    if ticks % 30 == 0 {
                        debug!(ticks, "Telemetry loop alive");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down telemetry loop");
                    break;
                }
            }
        }
    }

    /// Advance every series by one point
    pub fn tick(&self) {
        self.state.apply(|s| {
            let effects = s.effects;
            s.telemetry.tick(effects, Utc::now(), &mut s.rng);
        });
        self.metrics.inc_telemetry_ticks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LabConfig;
    use crate::models::SimulationEffects;

    fn shared() -> Arc<SharedState> {
        Arc::new(SharedState::new(&LabConfig::seeded(3)))
    }

    #[test]
    fn test_settings_default() {
        assert_eq!(TelemetrySettings::default().interval, Duration::from_secs(2));
    }

    #[test]
    fn test_tick_reads_current_effects() {
        let state = shared();
        state.apply(|s| {
            s.effects = SimulationEffects {
                latency_injection_ms: 300,
                cpu_spike_percent: 0,
            }
        });
        let telemetry = TelemetryLoop::new(state.clone(), TelemetrySettings::default(), LabMetrics::new());

        telemetry.tick();

        let latest = state.read(|s| s.telemetry.api_latency.latest()).unwrap();
        assert!(latest >= 380.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_ticks_until_shutdown() {
        let state = shared();
        let (tx, rx) = broadcast::channel(1);
        let telemetry = TelemetryLoop::new(
            state.clone(),
            TelemetrySettings {
                interval: Duration::from_secs(2),
            },
            LabMetrics::new(),
        );

        let handle = tokio::spawn(telemetry.run(rx));
        tokio::time::sleep(Duration::from_secs(9)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();

        // ticks at t = 0, 2, 4, 6, 8
        let count = state.read(|s| s.telemetry.cpu.points().len());
        assert_eq!(count, 5);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(state.read(|s| s.telemetry.cpu.points().len()), 5);
    }
}
