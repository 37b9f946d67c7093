//! Pipeline, cluster and incident views

use anyhow::Result;
use colored::Colorize;
use lab_core::canary::MetricTrend;
use lab_core::{Incident, LabSnapshot};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{color_status, color_trend, format_duration_ms, print_json, print_table, OutputFormat};

/// Row for the stage table
#[derive(Tabled)]
struct StageRow {
    #[tabled(rename = "Stage")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Duration")]
    duration: String,
    #[tabled(rename = "Details")]
    details: String,
}

/// Row for the pod table
#[derive(Tabled)]
struct PodRow {
    #[tabled(rename = "Pod")]
    name: String,
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Weight")]
    weight: String,
    #[tabled(rename = "Restarts")]
    restarts: u32,
}

/// Row for the canary comparison table
#[derive(Tabled)]
struct CanaryRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Baseline")]
    baseline: String,
    #[tabled(rename = "Canary")]
    canary: String,
    #[tabled(rename = "Delta")]
    delta: String,
    #[tabled(rename = "Trend")]
    trend: String,
}

/// Row for the incident table
#[derive(Tabled)]
struct IncidentRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Started")]
    started: String,
    #[tabled(rename = "Duration")]
    duration: String,
}

impl From<&Incident> for IncidentRow {
    fn from(incident: &Incident) -> Self {
        Self {
            id: incident.id.clone(),
            kind: incident.incident_type.to_string(),
            target: incident.target.clone().unwrap_or_else(|| "-".to_string()),
            status: color_status(&incident.status.to_string()),
            started: incident.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            duration: format_duration_ms(incident.duration_observed_ms),
        }
    }
}

/// Show the pipeline, canary analysis and pods
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let snapshot = client.snapshot().await?;

    match format {
        OutputFormat::Json => print_json(&snapshot)?,
        OutputFormat::Table => print_snapshot(&snapshot),
    }

    Ok(())
}

pub fn print_snapshot(snapshot: &LabSnapshot) {
    let pipeline = &snapshot.pipeline;

    println!("{}", "Pipeline".bold());
    println!("{}", "=".repeat(50));
    println!(
        "Status:                 {} (run #{})",
        color_status(&pipeline.status.to_string()),
        pipeline.run_id
    );
    println!("Service:                {}", snapshot.cluster.primary_service.cyan());
    println!("Live version:           {}", snapshot.cluster.current_version);
    if let Some(config) = &pipeline.config {
        println!(
            "Rollout:                {} via {} at {}%",
            config.version_tag.cyan(),
            config.strategy,
            config.traffic_weight_percent
        );
    }
    if let Some(scenario) = &snapshot.scenario {
        println!("Scenario:               {}", scenario.title);
    }
    println!();

    let stages: Vec<StageRow> = pipeline
        .stages
        .iter()
        .map(|s| StageRow {
            name: s.name.clone(),
            status: color_status(&s.status.to_string()),
            duration: format_duration_ms(s.observed_duration_ms),
            details: s.details_command.clone(),
        })
        .collect();
    print_table(stages, "No pipeline stages");

    if let Some(analysis) = &snapshot.canary_analysis {
        println!();
        println!("{}", "Canary Analysis".bold());
        let rows: Vec<CanaryRow> = analysis
            .deltas
            .iter()
            .map(|d| CanaryRow {
                metric: d.metric.label().to_string(),
                baseline: format!("{:.2}", d.baseline),
                canary: format!("{:.2}", d.canary),
                delta: format!("{:+.2}", d.delta),
                trend: color_trend(&d.trend.to_string(), d.trend == MetricTrend::Worse),
            })
            .collect();
        print_table(rows, "No canary metrics");
    }

    let effects = &snapshot.effects;
    if !effects.is_quiet() {
        println!();
        if effects.latency_injection_ms > 0 {
            println!("{} +{}ms latency injected", "Effect:".yellow().bold(), effects.latency_injection_ms);
        }
        if effects.cpu_spike_percent > 0 {
            println!("{} CPU spike at {}%", "Effect:".yellow().bold(), effects.cpu_spike_percent);
        }
    }

    println!();
    let pods: Vec<PodRow> = snapshot
        .cluster
        .placements()
        .map(|(node, pod)| PodRow {
            name: if pod.is_canary {
                format!("{} {}", pod.name, "(canary)".magenta())
            } else {
                pod.name.clone()
            },
            node: node.name.clone(),
            status: color_status(&pod.status.to_string()),
            version: pod.version.clone(),
            weight: pod
                .traffic_weight
                .map(|w| format!("{:.1}%", w))
                .unwrap_or_else(|| "-".to_string()),
            restarts: pod.restarts,
        })
        .collect();
    print_table(pods, "No pods scheduled");
}

/// Show active and resolved incidents
pub async fn show_incidents(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let incidents = client.incidents().await?;

    match format {
        OutputFormat::Json => print_json(&incidents)?,
        OutputFormat::Table => {
            let rows: Vec<IncidentRow> = incidents
                .active
                .iter()
                .chain(incidents.history.iter())
                .map(IncidentRow::from)
                .collect();
            let total = rows.len();
            print_table(rows, "No incidents recorded");
            if total > 0 {
                println!(
                    "\nActive: {}, resolved: {}",
                    incidents.active.len(),
                    incidents.history.len()
                );
            }
        }
    }

    Ok(())
}
