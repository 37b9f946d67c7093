//! Pipeline stages and their status transitions

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Queued,
    InProgress,
    Success,
    Failed,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageStatus::Queued => write!(f, "queued"),
            StageStatus::InProgress => write!(f, "in_progress"),
            StageStatus::Success => write!(f, "success"),
            StageStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageEvent {
    Start,
    Succeed,
    Fail,
    /// Rollback marks the stage failed whatever it had reached
    Abort,
    Reset,
}

/// Stage status machine. `None` means the event is not valid in `status`.
pub fn transition(status: StageStatus, event: StageEvent) -> Option<StageStatus> {
    use StageEvent::*;
    use StageStatus::*;

    match (status, event) {
        (Queued, Start) => Some(InProgress),
        (InProgress, Succeed) => Some(Success),
        (InProgress, Fail) => Some(Failed),
        (Queued | InProgress | Success, Abort) => Some(Failed),
        (_, Reset) => Some(Queued),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStage {
    pub name: String,
    pub status: StageStatus,
    pub details_command: String,
    pub base_duration_ms: u64,
    /// Set when the stage finishes
    pub observed_duration_ms: Option<u64>,
    pub log_output: Vec<String>,
}

impl PipelineStage {
    /// Apply `event`; returns false and leaves the stage untouched when invalid
    pub fn apply(&mut self, event: StageEvent) -> bool {
        match transition(self.status, event) {
            Some(next) => {
                self.status = next;
                if event == StageEvent::Reset {
                    self.observed_duration_ms = None;
                }
                true
            }
            None => false,
        }
    }
}

/// Blueprint for one stage. `{service}`, `{version}` and `{weight}` in the
/// command and log lines are filled in when a run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTemplate {
    pub name: String,
    pub details_command: String,
    pub base_duration_ms: u64,
    pub log_output: Vec<String>,
    /// Stage always fails (scenario-seeded failures)
    #[serde(default)]
    pub forced_failure: bool,
}

impl StageTemplate {
    pub fn new(name: &str, base_duration_ms: u64, details_command: &str, log_output: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            details_command: details_command.to_string(),
            base_duration_ms,
            log_output: log_output.iter().map(|l| l.to_string()).collect(),
            forced_failure: false,
        }
    }

    pub fn instantiate(&self, service: &str, version: &str, weight: u8) -> PipelineStage {
        let render = |text: &str| {
            text.replace("{service}", service)
                .replace("{version}", version)
                .replace("{weight}", &weight.to_string())
        };
        PipelineStage {
            name: self.name.clone(),
            status: StageStatus::Queued,
            details_command: render(&self.details_command),
            base_duration_ms: self.base_duration_ms,
            observed_duration_ms: None,
            log_output: self.log_output.iter().map(|l| render(l)).collect(),
        }
    }
}

pub fn default_templates() -> Vec<StageTemplate> {
    vec![
        StageTemplate::new(
            "Source",
            1_500,
            "git clone --depth 1 git@github.com:devops-lab/{service}.git",
            &[
                "Cloning into '{service}'...",
                "HEAD is now at 3f9c2ab feat: add readiness probe",
            ],
        ),
        StageTemplate::new(
            "Build",
            3_000,
            "docker build -t registry.lab.local/{service}:{version} .",
            &[
                "Step 1/8 : FROM rust:1.75-slim AS builder",
                "Successfully built 9d2f4c1e7a3b",
                "Successfully tagged registry.lab.local/{service}:{version}",
            ],
        ),
        StageTemplate::new(
            "Test",
            2_500,
            "cargo test --workspace",
            &["running 142 tests", "test result: ok. 142 passed; 0 failed"],
        ),
        StageTemplate::new(
            "Staging",
            2_000,
            "kubectl apply -f k8s/ --namespace staging",
            &[
                "deployment.apps/{service} configured",
                "Smoke tests passed against staging.lab.local",
            ],
        ),
        StageTemplate::new(
            "Canary",
            2_000,
            "kubectl argo rollouts set weight {service} {weight}",
            &[
                "Canary pod scheduled for {service}:{version}",
                "Routing {weight}% of traffic to {version}",
            ],
        ),
        StageTemplate::new(
            "Production",
            2_500,
            "kubectl argo rollouts promote {service}",
            &[
                "Rollout {service} promoted",
                "All replicas updated to {version}",
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert_eq!(transition(StageStatus::Queued, StageEvent::Start), Some(StageStatus::InProgress));
        assert_eq!(transition(StageStatus::InProgress, StageEvent::Succeed), Some(StageStatus::Success));
        assert_eq!(transition(StageStatus::InProgress, StageEvent::Fail), Some(StageStatus::Failed));
        assert_eq!(transition(StageStatus::Success, StageEvent::Abort), Some(StageStatus::Failed));
        assert_eq!(transition(StageStatus::Failed, StageEvent::Reset), Some(StageStatus::Queued));
    }

    #[test]
    fn test_invalid_transitions() {
        assert_eq!(transition(StageStatus::Queued, StageEvent::Succeed), None);
        assert_eq!(transition(StageStatus::Success, StageEvent::Start), None);
        assert_eq!(transition(StageStatus::Failed, StageEvent::Succeed), None);
        assert_eq!(transition(StageStatus::Failed, StageEvent::Abort), None);
    }

    #[test]
    fn test_apply_rejects_without_mutation() {
        let mut stage = default_templates()[0].instantiate("homepage", "v1.5.0", 10);
        assert!(!stage.apply(StageEvent::Succeed));
        assert_eq!(stage.status, StageStatus::Queued);
    }

    #[test]
    fn test_instantiate_fills_placeholders() {
        let templates = default_templates();
        assert_eq!(templates.len(), 6);

        let canary = templates[4].instantiate("homepage", "v1.5.0", 25);
        assert_eq!(canary.details_command, "kubectl argo rollouts set weight homepage 25");
        assert!(canary.log_output.iter().any(|l| l == "Routing 25% of traffic to v1.5.0"));
        assert_eq!(canary.status, StageStatus::Queued);
        assert!(canary.observed_duration_ms.is_none());
    }
}
