//! External scenarios
//!
//! A scenario replaces the built-in service layout and stage list. Sources
//! return an unvalidated `Scenario`; nothing is applied unless the whole
//! scenario validates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;

use crate::cluster::ServiceSeed;
use crate::pipeline::StageTemplate;
use crate::state::ScenarioInfo;

pub const MIN_SERVICES: usize = 3;
pub const MAX_SERVICES: usize = 5;
pub const MIN_STAGES: usize = 4;
pub const MAX_STAGES: usize = 6;
pub const MAX_AFFECTED_SERVICES: usize = 3;
const MIN_STAGE_DURATION_MS: u64 = 100;
const MAX_STAGE_DURATION_MS: u64 = 60_000;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScenarioError {
    #[error("scenario source unavailable: {0}")]
    Unavailable(String),

    #[error("malformed scenario: {0}")]
    Malformed(String),

    #[error("invalid scenario: {0}")]
    Invalid(String),

    #[error("cannot load a scenario while a deployment is in progress")]
    Busy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioStage {
    pub name: String,
    /// Milliseconds
    pub duration: u64,
    /// `failed` forces the stage to fail; anything else runs normally
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub log_output: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_incident: bool,
    pub services: Vec<String>,
    pub pipeline_stages: Vec<ScenarioStage>,
    #[serde(default)]
    pub log_theme: String,
    #[serde(default)]
    pub affected_services: Vec<String>,
}

impl Scenario {
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.title.trim().is_empty() {
            return Err(ScenarioError::Invalid("title is empty".to_string()));
        }

        if !(MIN_SERVICES..=MAX_SERVICES).contains(&self.services.len()) {
            return Err(ScenarioError::Invalid(format!(
                "expected {MIN_SERVICES}-{MAX_SERVICES} services, got {}",
                self.services.len()
            )));
        }
        let mut seen = HashSet::new();
        for service in &self.services {
            if !is_dns_label(service) {
                return Err(ScenarioError::Invalid(format!("invalid service name '{service}'")));
            }
            if !seen.insert(service.as_str()) {
                return Err(ScenarioError::Invalid(format!("duplicate service '{service}'")));
            }
        }

        if !(MIN_STAGES..=MAX_STAGES).contains(&self.pipeline_stages.len()) {
            return Err(ScenarioError::Invalid(format!(
                "expected {MIN_STAGES}-{MAX_STAGES} pipeline stages, got {}",
                self.pipeline_stages.len()
            )));
        }
        for stage in &self.pipeline_stages {
            if stage.name.trim().is_empty() {
                return Err(ScenarioError::Invalid("stage name is empty".to_string()));
            }
            if !(MIN_STAGE_DURATION_MS..=MAX_STAGE_DURATION_MS).contains(&stage.duration) {
                return Err(ScenarioError::Invalid(format!(
                    "stage '{}' duration {}ms outside {MIN_STAGE_DURATION_MS}-{MAX_STAGE_DURATION_MS}ms",
                    stage.name, stage.duration
                )));
            }
        }

        if self.affected_services.len() > MAX_AFFECTED_SERVICES {
            return Err(ScenarioError::Invalid(format!(
                "at most {MAX_AFFECTED_SERVICES} affected services, got {}",
                self.affected_services.len()
            )));
        }
        if let Some(unknown) = self.affected_services.iter().find(|s| !seen.contains(s.as_str())) {
            return Err(ScenarioError::Invalid(format!(
                "affected service '{unknown}' is not one of the scenario services"
            )));
        }
        Ok(())
    }

    /// Service layout; the first service carries the traffic split
    pub fn service_seeds(&self) -> Vec<ServiceSeed> {
        self.services
            .iter()
            .enumerate()
            .map(|(i, name)| match i {
                0 => ServiceSeed::new(name.clone(), 3).with_requests(250, 256).with_port(80),
                1 => ServiceSeed::new(name.clone(), 2).with_requests(500, 512),
                _ => ServiceSeed::new(name.clone(), 1),
            })
            .collect()
    }

    /// Stage list; the last two stages act as canary gate and production
    pub fn stage_templates(&self) -> Vec<StageTemplate> {
        self.pipeline_stages
            .iter()
            .map(|stage| StageTemplate {
                name: stage.name.clone(),
                details_command: format!("run-stage {}", stage.name.to_lowercase().replace(' ', "-")),
                base_duration_ms: stage.duration,
                log_output: stage.log_output.clone(),
                forced_failure: stage.status.eq_ignore_ascii_case("failed"),
            })
            .collect()
    }

    pub fn info(&self) -> ScenarioInfo {
        ScenarioInfo {
            title: self.title.clone(),
            description: self.description.clone(),
            is_incident: self.is_incident,
            log_theme: self.log_theme.clone(),
        }
    }
}

fn is_dns_label(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-')
}

/// Where scenarios come from
#[async_trait]
pub trait ScenarioSource: Send + Sync {
    async fn fetch(&self) -> Result<Scenario, ScenarioError>;

    /// Short label for logs
    fn describe(&self) -> String;
}

/// Reads a scenario from a JSON file
pub struct JsonFileScenarioSource {
    path: PathBuf,
}

impl JsonFileScenarioSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ScenarioSource for JsonFileScenarioSource {
    async fn fetch(&self) -> Result<Scenario, ScenarioError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ScenarioError::Unavailable(format!("{}: {e}", self.path.display())))?;
        serde_json::from_str(&content).map_err(|e| ScenarioError::Malformed(e.to_string()))
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}

/// A fixed, in-memory scenario
pub struct StaticScenarioSource {
    scenario: Scenario,
}

impl StaticScenarioSource {
    pub fn new(scenario: Scenario) -> Self {
        Self { scenario }
    }
}

#[async_trait]
impl ScenarioSource for StaticScenarioSource {
    async fn fetch(&self) -> Result<Scenario, ScenarioError> {
        Ok(self.scenario.clone())
    }

    fn describe(&self) -> String {
        format!("static '{}'", self.scenario.title)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn black_friday() -> Scenario {
        serde_json::from_str(
            r#"{
                "title": "Black Friday Checkout",
                "description": "Checkout latency climbs under peak load",
                "isIncident": true,
                "services": ["checkout", "payments", "inventory", "search"],
                "pipelineStages": [
                    {"name": "Source", "duration": 1000, "status": "success", "logOutput": ["cloned"]},
                    {"name": "Build", "duration": 2000, "status": "success", "logOutput": ["built"]},
                    {"name": "Load Test", "duration": 1500, "status": "success", "logOutput": ["p95 180ms"]},
                    {"name": "Canary", "duration": 1000, "status": "queued", "logOutput": []},
                    {"name": "Production", "duration": 1000, "status": "queued", "logOutput": []}
                ],
                "logTheme": "retail",
                "affectedServices": ["payments"]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_valid_scenario() {
        let scenario = black_friday();
        assert!(scenario.validate().is_ok());

        let seeds = scenario.service_seeds();
        assert_eq!(seeds[0].name, "checkout");
        assert_eq!(seeds[0].replicas, 3);

        let templates = scenario.stage_templates();
        assert_eq!(templates.len(), 5);
        assert_eq!(templates[2].details_command, "run-stage load-test");
        assert!(templates.iter().all(|t| !t.forced_failure));
    }

    #[test]
    fn test_failed_stage_is_forced() {
        let mut scenario = black_friday();
        scenario.pipeline_stages[1].status = "failed".to_string();
        assert!(scenario.stage_templates()[1].forced_failure);
    }

    #[test]
    fn test_rejects_bad_shapes() {
        let mut too_few = black_friday();
        too_few.services.truncate(2);
        assert!(matches!(too_few.validate(), Err(ScenarioError::Invalid(_))));

        let mut duplicate = black_friday();
        duplicate.services[1] = "checkout".to_string();
        assert!(duplicate.validate().is_err());

        let mut stages = black_friday();
        stages.pipeline_stages.truncate(3);
        assert!(stages.validate().is_err());

        let mut slow = black_friday();
        slow.pipeline_stages[0].duration = 120_000;
        assert!(slow.validate().is_err());

        let mut stranger = black_friday();
        stranger.affected_services = vec!["billing".to_string()];
        assert!(stranger.validate().is_err());

        let mut untitled = black_friday();
        untitled.title = "  ".to_string();
        assert!(untitled.validate().is_err());

        let mut shouty = black_friday();
        shouty.services[0] = "Checkout".to_string();
        assert!(shouty.validate().is_err());
    }

    #[tokio::test]
    async fn test_json_file_source() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scenario.json");
        std::fs::write(&path, serde_json::to_string(&black_friday()).unwrap()).unwrap();

        let scenario = JsonFileScenarioSource::new(&path).fetch().await.unwrap();
        assert_eq!(scenario.title, "Black Friday Checkout");

        std::fs::write(&path, "{\"title\": 3}").unwrap();
        assert!(matches!(
            JsonFileScenarioSource::new(&path).fetch().await,
            Err(ScenarioError::Malformed(_))
        ));

        assert!(matches!(
            JsonFileScenarioSource::new(dir.path().join("missing.json")).fetch().await,
            Err(ScenarioError::Unavailable(_))
        ));
    }
}
