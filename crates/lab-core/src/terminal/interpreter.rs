//! Terminal command interpreter
//!
//! Answers read-only commands (filesystem, kubectl, helm, git, status) from a
//! snapshot and hands state-changing commands back to the lab as a delegation.

use tracing::debug;

use super::fs::{VirtualFs, HOME};
use super::parse::{parse_deploy, tokenize};
use super::tools::{self, render_table};
use super::{CommandError, CommandOutput, Interpretation, LabCommand};
use crate::chaos::ChaosScenario;
use crate::models::Incident;
use crate::pipeline::{PipelineStatus, StageStatus};
use crate::state::LabSnapshot;

const HELP: &[&str] = &[
    "Available commands:",
    "  help                      show this message",
    "  whoami | pwd | clear      the usual",
    "  ls [path] | cat <path>    browse the lab filesystem",
    "  echo <text>               print text",
    "  kubectl get pods|nodes|services",
    "  kubectl describe pod <name> | kubectl logs <name>",
    "  helm list | helm status <release>",
    "  git status|log|branch|remote [-v]",
    "  deploy [--strategy canary|blue-green] [--weight 1-99] [--version vX.Y.Z]",
    "  promote | rollback        decide at the canary gate",
    "  status                    pipeline, canary analysis and effects",
    "  chaos pod_failure|latency|cpu_spike",
    "  chaos auto on|off         random experiment every 20s",
    "  incidents | history",
];

#[derive(Default)]
pub struct Interpreter {
    fs: VirtualFs,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify and, where possible, answer one line of input
    pub fn interpret(&self, line: &str, snapshot: &LabSnapshot) -> Result<Interpretation, CommandError> {
        let tokens = tokenize(line)?;
        let Some((verb, args)) = tokens.split_first() else {
            return Err(CommandError::Empty);
        };
        debug!(verb = %verb, args = args.len(), "Interpreting command");

        let output = match verb.as_str() {
            "help" => lines(HELP.iter().copied()),
            "whoami" => CommandOutput::Text("visitor".to_string()),
            "pwd" => CommandOutput::Text(HOME.to_string()),
            "clear" => CommandOutput::Clear,
            "echo" => CommandOutput::Text(args.join(" ")),
            "ls" => self.ls(args)?,
            "cat" => self.cat(args)?,
            "kubectl" => CommandOutput::Lines(tools::kubectl(args, snapshot)?),
            "helm" => CommandOutput::Lines(tools::helm(args, snapshot)?),
            "git" => CommandOutput::Lines(tools::git(args)?),
            "status" => CommandOutput::Lines(render_status(snapshot)),
            "incidents" => CommandOutput::Lines(render_incidents(snapshot)),
            "deploy" => return Ok(Interpretation::Delegate(LabCommand::Deploy(parse_deploy(args)?))),
            "promote" => return Ok(Interpretation::Delegate(LabCommand::Promote)),
            "rollback" => return Ok(Interpretation::Delegate(LabCommand::Rollback)),
            "history" => return Ok(Interpretation::Delegate(LabCommand::ShowHistory)),
            "chaos" => return parse_chaos(args).map(Interpretation::Delegate),
            other => return Err(CommandError::NotFound(other.to_string())),
        };
        Ok(Interpretation::Output(output))
    }

    fn ls(&self, args: &[String]) -> Result<CommandOutput, CommandError> {
        let path = args.iter().find(|a| !a.starts_with('-')).map(String::as_str).unwrap_or("~");
        let entries = self.fs.list(path).ok_or_else(|| CommandError::NoSuchFile {
            verb: "ls".to_string(),
            path: path.to_string(),
        })?;
        Ok(CommandOutput::Text(entries.join("  ")))
    }

    fn cat(&self, args: &[String]) -> Result<CommandOutput, CommandError> {
        let Some(path) = args.first() else {
            return Err(CommandError::Usage("usage: cat <path>".to_string()));
        };
        if self.fs.is_dir(path) {
            return Err(CommandError::Usage(format!("cat: {path}: Is a directory")));
        }
        let content = self.fs.read(path).ok_or_else(|| CommandError::NoSuchFile {
            verb: "cat".to_string(),
            path: path.to_string(),
        })?;
        Ok(CommandOutput::Text(content.to_string()))
    }
}

fn lines<'a>(items: impl Iterator<Item = &'a str>) -> CommandOutput {
    CommandOutput::Lines(items.map(str::to_string).collect())
}

fn parse_chaos(args: &[String]) -> Result<LabCommand, CommandError> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match args.as_slice() {
        ["auto", "on"] => Ok(LabCommand::AutoChaos(true)),
        ["auto", "off"] => Ok(LabCommand::AutoChaos(false)),
        ["auto", ..] => Err(CommandError::Usage("usage: chaos auto on|off".to_string())),
        [scenario] => Ok(LabCommand::Chaos(scenario.parse::<ChaosScenario>()?)),
        _ => Err(CommandError::Usage(
            "usage: chaos pod_failure|latency|cpu_spike | chaos auto on|off".to_string(),
        )),
    }
}

fn stage_marker(status: StageStatus) -> &'static str {
    match status {
        StageStatus::Queued => "[ ]",
        StageStatus::InProgress => "[>]",
        StageStatus::Success => "[x]",
        StageStatus::Failed => "[!]",
    }
}

fn render_status(snapshot: &LabSnapshot) -> Vec<String> {
    let pipeline = &snapshot.pipeline;
    let mut out = vec![format!("Pipeline: {} (run #{})", pipeline.status, pipeline.run_id)];

    if let Some(config) = &pipeline.config {
        out.push(format!(
            "Rollout:  {} {} via {} at {}%",
            snapshot.cluster.primary_service, config.version_tag, config.strategy, config.traffic_weight_percent
        ));
    }
    out.push(format!("Live:     {}", snapshot.cluster.current_version));

    for stage in &pipeline.stages {
        let timing = stage
            .observed_duration_ms
            .map(|ms| format!(" {:.1}s", ms as f64 / 1000.0))
            .unwrap_or_default();
        out.push(format!("  {} {}{}", stage_marker(stage.status), stage.name, timing));
    }

    if let Some(analysis) = &snapshot.canary_analysis {
        out.push(String::new());
        out.extend(analysis.render_lines());
        if pipeline.status == PipelineStatus::PausedCanary {
            out.push("Awaiting decision: run `promote` or `rollback`".to_string());
        }
    }

    let effects = &snapshot.effects;
    if !effects.is_quiet() {
        out.push(String::new());
        if effects.latency_injection_ms > 0 {
            out.push(format!("Effect: +{}ms latency injected", effects.latency_injection_ms));
        }
        if effects.cpu_spike_percent > 0 {
            out.push(format!("Effect: CPU spike at {}%", effects.cpu_spike_percent));
        }
    }
    out
}

#[derive(tabled::Tabled)]
struct IncidentRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "TYPE")]
    kind: String,
    #[tabled(rename = "TARGET")]
    target: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "STARTED")]
    started: String,
    #[tabled(rename = "DURATION")]
    duration: String,
}

impl From<&Incident> for IncidentRow {
    fn from(incident: &Incident) -> Self {
        Self {
            id: incident.id.clone(),
            kind: incident.incident_type.to_string(),
            target: incident.target.clone().unwrap_or_else(|| "-".to_string()),
            status: incident.status.to_string(),
            started: incident.started_at.format("%H:%M:%S").to_string(),
            duration: incident
                .duration_observed_ms
                .map(|ms| format!("{:.1}s", ms as f64 / 1000.0))
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

fn render_incidents(snapshot: &LabSnapshot) -> Vec<String> {
    if snapshot.active_incidents.is_empty() && snapshot.incident_history.is_empty() {
        return vec!["No incidents recorded. Try `chaos latency`.".to_string()];
    }
    let rows: Vec<IncidentRow> = snapshot
        .active_incidents
        .iter()
        .chain(snapshot.incident_history.iter())
        .map(IncidentRow::from)
        .collect();
    render_table(rows)
}
