//! Simulated `kubectl`, `helm` and `git`

use tabled::{settings::Style, Table, Tabled};

use super::CommandError;
use crate::models::{Pod, PodStatus};
use crate::state::LabSnapshot;

#[derive(Tabled)]
struct PodRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "READY")]
    ready: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "RESTARTS")]
    restarts: u32,
    #[tabled(rename = "IP")]
    ip: String,
    #[tabled(rename = "NODE")]
    node: String,
    #[tabled(rename = "WEIGHT")]
    weight: String,
}

#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "PODS")]
    pods: usize,
    #[tabled(rename = "CPU(REQ)")]
    cpu: String,
    #[tabled(rename = "MEMORY(REQ)")]
    memory: String,
}

#[derive(Tabled)]
struct ServiceRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "TYPE")]
    kind: String,
    #[tabled(rename = "CLUSTER-IP")]
    cluster_ip: String,
    #[tabled(rename = "PORT(S)")]
    ports: String,
}

#[derive(Tabled)]
struct ReleaseRow {
    #[tabled(rename = "NAME")]
    name: &'static str,
    #[tabled(rename = "NAMESPACE")]
    namespace: &'static str,
    #[tabled(rename = "REVISION")]
    revision: u32,
    #[tabled(rename = "STATUS")]
    status: &'static str,
    #[tabled(rename = "CHART")]
    chart: &'static str,
    #[tabled(rename = "APP VERSION")]
    app_version: String,
}

/// Borderless table, one string per row, header first
pub(crate) fn render_table<T: Tabled>(rows: Vec<T>) -> Vec<String> {
    Table::new(rows)
        .with(Style::blank())
        .to_string()
        .lines()
        .map(|line| {
            let line = line.trim_end();
            line.strip_prefix(' ').unwrap_or(line).to_string()
        })
        .collect()
}

fn format_weight(pod: &Pod) -> String {
    match pod.traffic_weight {
        Some(w) if (w - w.round()).abs() < 0.05 => format!("{:.0}%", w),
        Some(w) => format!("{:.1}%", w),
        None => "-".to_string(),
    }
}

pub fn kubectl(args: &[String], snapshot: &LabSnapshot) -> Result<Vec<String>, CommandError> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match args.as_slice() {
        ["get", resource, ..] => kubectl_get(resource, snapshot),
        ["describe", "pod" | "pods" | "po", name, ..] => describe_pod(name, snapshot),
        ["logs", name, ..] => pod_logs(name, snapshot),
        ["describe", ..] => Err(CommandError::Usage(
            "usage: kubectl describe pod <name>".to_string(),
        )),
        ["logs"] => Err(CommandError::Usage("usage: kubectl logs <pod>".to_string())),
        [] => Ok(vec![
            "kubectl controls the (simulated) Kubernetes cluster manager.".to_string(),
            String::new(),
            "  kubectl get pods|nodes|services".to_string(),
            "  kubectl describe pod <name>".to_string(),
            "  kubectl logs <pod>".to_string(),
        ]),
        [other, ..] => Err(CommandError::Usage(format!(
            "error: unknown command \"{other}\" for \"kubectl\""
        ))),
    }
}

fn kubectl_get(resource: &str, snapshot: &LabSnapshot) -> Result<Vec<String>, CommandError> {
    let cluster = &snapshot.cluster;
    match resource {
        "pods" | "pod" | "po" => {
            let rows: Vec<PodRow> = cluster
                .placements()
                .map(|(node, pod)| PodRow {
                    name: pod.name.clone(),
                    ready: pod.ready().to_string(),
                    status: pod.status.to_string(),
                    restarts: pod.restarts,
                    ip: pod.ip.clone(),
                    node: node.name.clone(),
                    weight: format_weight(pod),
                })
                .collect();
            Ok(render_table(rows))
        }
        "nodes" | "node" | "no" => {
            let rows: Vec<NodeRow> = cluster
                .nodes
                .iter()
                .map(|node| NodeRow {
                    name: node.name.clone(),
                    status: "Ready".to_string(),
                    pods: node.pods.len(),
                    cpu: format!(
                        "{}m/{}m",
                        node.cpu_requested_millicores(),
                        node.cpu_capacity_millicores
                    ),
                    memory: format!(
                        "{}Mi/{}Mi",
                        node.memory_requested_mib(),
                        node.memory_capacity_mib
                    ),
                })
                .collect();
            Ok(render_table(rows))
        }
        "services" | "service" | "svc" => {
            let mut rows = vec![ServiceRow {
                name: "kubernetes".to_string(),
                kind: "ClusterIP".to_string(),
                cluster_ip: "10.96.0.1".to_string(),
                ports: "443/TCP".to_string(),
            }];
            rows.extend(cluster.services.iter().map(|svc| ServiceRow {
                name: svc.name.clone(),
                kind: "ClusterIP".to_string(),
                cluster_ip: cluster.service_ip(&svc.name).unwrap_or_default(),
                ports: format!("{}/TCP", svc.port),
            }));
            Ok(render_table(rows))
        }
        other => Err(CommandError::Usage(format!(
            "error: the server doesn't have a resource type \"{other}\""
        ))),
    }
}

fn describe_pod(query: &str, snapshot: &LabSnapshot) -> Result<Vec<String>, CommandError> {
    let (node, pod) = snapshot
        .cluster
        .find_pod(query)
        .ok_or_else(|| CommandError::PodNotFound(query.to_string()))?;

    let track = if pod.is_canary { "canary" } else { "stable" };
    let mut lines = vec![
        format!("Name:           {}", pod.name),
        "Namespace:      default".to_string(),
        format!("Node:           {}", node.name),
        format!("Labels:         app={}, track={}", pod.service, track),
        format!("Status:         {}", pod.status),
        format!("IP:             {}", pod.ip),
        "Containers:".to_string(),
        format!("  {}:", pod.service),
        format!("    Image:          registry.lab.local/{}:{}", pod.service, pod.version),
        format!("    Ready:          {}", pod.status == PodStatus::Running),
        format!("    Restart Count:  {}", pod.restarts),
        "    Requests:".to_string(),
        format!("      cpu:      {}m", pod.cpu_request_millicores),
        format!("      memory:   {}Mi", pod.memory_request_mib),
    ];
    if let Some(weight) = pod.traffic_weight {
        lines.push(format!("Traffic Weight: {:.1}%", weight));
    }
    lines.push("Events:".to_string());
    lines.extend(match pod.status {
        PodStatus::Running => vec![
            "  Normal   Scheduled  Successfully assigned pod".to_string(),
            "  Normal   Started    Started container".to_string(),
        ],
        PodStatus::Pending => vec![
            "  Normal   Scheduled  Successfully assigned pod".to_string(),
            "  Normal   Pulling    Pulling image".to_string(),
        ],
        PodStatus::Error => vec![
            "  Warning  BackOff    Back-off restarting failed container".to_string(),
            "  Warning  Unhealthy  Liveness probe failed: connection refused".to_string(),
        ],
    });
    Ok(lines)
}

fn pod_logs(query: &str, snapshot: &LabSnapshot) -> Result<Vec<String>, CommandError> {
    let (_, pod) = snapshot
        .cluster
        .find_pod(query)
        .ok_or_else(|| CommandError::PodNotFound(query.to_string()))?;

    let lines = match pod.status {
        PodStatus::Running => vec![
            format!("[INFO] {} {} starting", pod.service, pod.version),
            "[INFO] listening on 0.0.0.0:8080".to_string(),
            "[INFO] GET /healthz 200 2ms".to_string(),
            format!("[INFO] GET / 200 {}ms", 110 + pod.restarts * 7),
        ],
        PodStatus::Pending => vec![format!(
            "Error from server (BadRequest): container \"{}\" in pod \"{}\" is waiting to start: ContainerCreating",
            pod.service, pod.name
        )],
        PodStatus::Error => vec![
            format!("[INFO] {} {} starting", pod.service, pod.version),
            "[ERROR] upstream connection reset by peer".to_string(),
            "[ERROR] process exited with code 137".to_string(),
        ],
    };
    Ok(lines)
}

const RELEASES: &[(&str, &str, u32, &str)] = &[
    ("homepage", "default", 12, "homepage-0.8.1"),
    ("ingress-nginx", "ingress-nginx", 3, "ingress-nginx-4.8.3"),
    ("monitoring", "monitoring", 5, "kube-prometheus-stack-55.5.0"),
];

fn release_app_version(name: &str, snapshot: &LabSnapshot) -> String {
    match name {
        "homepage" => snapshot.cluster.current_version.clone(),
        "ingress-nginx" => "1.9.4".to_string(),
        _ => "v0.70.0".to_string(),
    }
}

pub fn helm(args: &[String], snapshot: &LabSnapshot) -> Result<Vec<String>, CommandError> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match args.as_slice() {
        ["list" | "ls", ..] => {
            let rows: Vec<ReleaseRow> = RELEASES
                .iter()
                .map(|&(name, namespace, revision, chart)| ReleaseRow {
                    name,
                    namespace,
                    revision,
                    status: "deployed",
                    chart,
                    app_version: release_app_version(name, snapshot),
                })
                .collect();
            Ok(render_table(rows))
        }
        ["status", release, ..] => {
            let (name, namespace, revision, chart) = RELEASES
                .iter()
                .find(|(name, ..)| name == release)
                .ok_or(CommandError::ReleaseNotFound)?;
            Ok(vec![
                format!("NAME: {name}"),
                "LAST DEPLOYED: Mon Jan 15 09:30:00 2024".to_string(),
                format!("NAMESPACE: {namespace}"),
                "STATUS: deployed".to_string(),
                format!("REVISION: {revision}"),
                format!("CHART: {chart}"),
                format!("APP VERSION: {}", release_app_version(name, snapshot)),
            ])
        }
        ["status"] => Err(CommandError::Usage(
            "Error: \"helm status\" requires 1 argument".to_string(),
        )),
        _ => Err(CommandError::Usage("usage: helm list | helm status <release>".to_string())),
    }
}

pub fn git(args: &[String]) -> Result<Vec<String>, CommandError> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let lines: &[&str] = match args.as_slice() {
        ["status", ..] => &[
            "On branch main",
            "Your branch is up to date with 'origin/main'.",
            "",
            "nothing to commit, working tree clean",
        ],
        ["log", ..] => &[
            "commit 3f9c2ab1d4e5f6a7b8c9d0e1f2a3b4c5d6e7f8a9 (HEAD -> main, origin/main)",
            "Author: Lab Bot <bot@devops-lab.local>",
            "Date:   Mon Jan 15 09:12:44 2024 +0000",
            "",
            "    feat: add readiness probe",
            "",
            "commit 8e1d0c7b6a5f4e3d2c1b0a9f8e7d6c5b4a3f2e1d",
            "Author: Lab Bot <bot@devops-lab.local>",
            "Date:   Fri Jan 12 16:40:03 2024 +0000",
            "",
            "    fix: tighten canary error budget",
        ],
        ["branch", ..] => &["  feature/canary-metrics", "* main", "  release/v1.4"],
        ["remote", "-v", ..] => &[
            "origin\tgit@github.com:devops-lab/homepage.git (fetch)",
            "origin\tgit@github.com:devops-lab/homepage.git (push)",
        ],
        ["remote", ..] => &["origin"],
        [other, ..] => {
            return Err(CommandError::Usage(format!(
                "git: '{other}' is not a git command. See 'git --help'."
            )))
        }
        [] => &["usage: git status | log | branch | remote [-v]"],
    };
    Ok(lines.iter().map(|l| l.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LabConfig;
    use crate::state::SharedState;

    fn snapshot() -> LabSnapshot {
        SharedState::new(&LabConfig::seeded(5)).snapshot()
    }

    fn words(args: &str) -> Vec<String> {
        args.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_get_pods_rows() {
        let snapshot = snapshot();
        let lines = kubectl(&words("get pods"), &snapshot).unwrap();
        assert_eq!(lines.len(), snapshot.cluster.pod_count() + 1);

        let header: Vec<&str> = lines[0].split_whitespace().collect();
        assert_eq!(header, vec!["NAME", "READY", "STATUS", "RESTARTS", "IP", "NODE", "WEIGHT"]);

        for (line, pod) in lines[1..].iter().zip(snapshot.cluster.pods()) {
            assert!(line.starts_with(&pod.name));
        }
    }

    #[test]
    fn test_get_nodes_and_services() {
        let snapshot = snapshot();
        assert_eq!(kubectl(&words("get nodes"), &snapshot).unwrap().len(), 4);
        let services = kubectl(&words("get svc"), &snapshot).unwrap();
        assert_eq!(services.len(), snapshot.cluster.services.len() + 2);
        assert!(kubectl(&words("get secrets"), &snapshot).is_err());
    }

    #[test]
    fn test_describe_and_logs_use_substring() {
        let snapshot = snapshot();
        let lines = kubectl(&words("describe pod redis"), &snapshot).unwrap();
        assert!(lines[0].contains("redis-cache"));
        assert!(kubectl(&words("logs api-gateway"), &snapshot).is_ok());

        let err = kubectl(&words("logs ghost"), &snapshot).unwrap_err();
        assert_eq!(err.to_string(), "Error from server (NotFound): pods \"ghost\" not found");
    }

    #[test]
    fn test_helm() {
        let snapshot = snapshot();
        let list = helm(&words("list"), &snapshot).unwrap();
        assert_eq!(list.len(), RELEASES.len() + 1);
        assert!(list[1].contains("v1.4.2"));

        assert!(helm(&words("status homepage"), &snapshot).is_ok());
        let err = helm(&words("status nope"), &snapshot).unwrap_err();
        assert_eq!(err.to_string(), "Error: release: not found");
    }

    #[test]
    fn test_git() {
        assert_eq!(git(&words("status")).unwrap()[0], "On branch main");
        assert_eq!(git(&words("remote -v")).unwrap().len(), 2);
        assert!(git(&words("push")).is_err());
    }
}
