//! Simulated Kubernetes cluster
//!
//! A fixed set of worker nodes carrying pods for a handful of services. One
//! service is the "primary" service whose traffic is split across pods; its
//! pod weights always sum to 100.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::models::{Node, Pod, PodStatus};
use crate::rng;

pub const DEFAULT_PRIMARY_SERVICE: &str = "homepage";
pub const DEFAULT_VERSION: &str = "v1.4.2";

/// Tolerance used when checking that traffic weights add up to 100
pub const WEIGHT_EPSILON: f64 = 1e-6;

const NODE_COUNT: usize = 3;
const NODE_CPU_CAPACITY_MILLICORES: u32 = 4000;
const NODE_MEMORY_CAPACITY_MIB: u32 = 8192;

/// Description of a service to lay out on the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSeed {
    pub name: String,
    pub replicas: usize,
    pub cpu_request_millicores: u32,
    pub memory_request_mib: u32,
    pub port: u16,
}

impl ServiceSeed {
    pub fn new(name: impl Into<String>, replicas: usize) -> Self {
        Self {
            name: name.into(),
            replicas,
            cpu_request_millicores: 200,
            memory_request_mib: 256,
            port: 8080,
        }
    }

    pub fn with_requests(mut self, cpu_millicores: u32, memory_mib: u32) -> Self {
        self.cpu_request_millicores = cpu_millicores;
        self.memory_request_mib = memory_mib;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

/// Built-in service layout used when no scenario is loaded
pub fn default_services() -> Vec<ServiceSeed> {
    vec![
        ServiceSeed::new(DEFAULT_PRIMARY_SERVICE, 3)
            .with_requests(250, 256)
            .with_port(80),
        ServiceSeed::new("api-gateway", 2).with_requests(500, 512),
        ServiceSeed::new("auth-service", 1).with_requests(200, 128),
        ServiceSeed::new("redis-cache", 1)
            .with_requests(100, 256)
            .with_port(6379),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub nodes: Vec<Node>,
    /// Service whose pods share traffic weights
    pub primary_service: String,
    /// Version the stable primary pods run
    pub current_version: String,
    pub services: Vec<ServiceSeed>,
}

impl Cluster {
    /// Lay out `services` round-robin over the fixed node set.
    /// The first service becomes the primary service.
    pub fn seed<R: Rng + ?Sized>(services: Vec<ServiceSeed>, version: &str, rng: &mut R) -> Self {
        let mut nodes: Vec<Node> = (0..NODE_COUNT)
            .map(|i| Node {
                name: format!("lab-worker-{}", i + 1),
                cpu_capacity_millicores: NODE_CPU_CAPACITY_MILLICORES,
                memory_capacity_mib: NODE_MEMORY_CAPACITY_MIB,
                pods: Vec::new(),
            })
            .collect();

        let mut slot = 0usize;
        for service in &services {
            let hash = rng::template_hash(rng);
            for _ in 0..service.replicas {
                let node_index = slot % NODE_COUNT;
                let pod = stable_pod(service, &hash, version, node_index, rng);
                nodes[node_index].pods.push(pod);
                slot += 1;
            }
        }

        let primary_service = services
            .first()
            .map(|s| s.name.clone())
            .unwrap_or_else(|| DEFAULT_PRIMARY_SERVICE.to_string());

        let mut cluster = Self {
            nodes,
            primary_service,
            current_version: version.to_string(),
            services,
        };
        cluster.rebalance_even();
        cluster
    }

    /// The built-in seed cluster
    pub fn builtin<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::seed(default_services(), DEFAULT_VERSION, rng)
    }

    pub fn pods(&self) -> impl Iterator<Item = &Pod> {
        self.nodes.iter().flat_map(|n| n.pods.iter())
    }

    /// Pods paired with the node they run on
    pub fn placements(&self) -> impl Iterator<Item = (&Node, &Pod)> {
        self.nodes
            .iter()
            .flat_map(|n| n.pods.iter().map(move |p| (n, p)))
    }

    pub fn pod_count(&self) -> usize {
        self.nodes.iter().map(|n| n.pods.len()).sum()
    }

    pub fn pod_names(&self) -> Vec<String> {
        self.pods().map(|p| p.name.clone()).collect()
    }

    /// Look a pod up by exact name, falling back to the first substring match
    pub fn find_pod(&self, query: &str) -> Option<(&Node, &Pod)> {
        self.placements()
            .find(|(_, p)| p.name == query)
            .or_else(|| self.placements().find(|(_, p)| p.name.contains(query)))
    }

    pub fn pod_mut(&mut self, name: &str) -> Option<&mut Pod> {
        self.nodes
            .iter_mut()
            .flat_map(|n| n.pods.iter_mut())
            .find(|p| p.name == name)
    }

    pub fn node_index_of(&self, pod_name: &str) -> Option<usize> {
        self.nodes
            .iter()
            .position(|n| n.pods.iter().any(|p| p.name == pod_name))
    }

    pub fn primary_pods(&self) -> impl Iterator<Item = &Pod> {
        let primary = self.primary_service.as_str();
        self.pods().filter(move |p| p.service == primary)
    }

    pub fn canary_pods(&self) -> impl Iterator<Item = &Pod> {
        self.pods().filter(|p| p.is_canary)
    }

    pub fn canary_count(&self) -> usize {
        self.canary_pods().count()
    }

    /// Sum of primary-service weights, `None` when the primary service has no pods
    pub fn traffic_weight_total(&self) -> Option<f64> {
        let mut pods = self.primary_pods().peekable();
        pods.peek()?;
        Some(pods.map(|p| p.traffic_weight.unwrap_or(0.0)).sum())
    }

    /// Weight invariant: primary weights sum to 100, other services carry none
    pub fn weights_consistent(&self) -> bool {
        let others_clean = self
            .pods()
            .filter(|p| p.service != self.primary_service)
            .all(|p| p.traffic_weight.is_none());
        let total_ok = match self.traffic_weight_total() {
            Some(total) => (total - 100.0).abs() <= WEIGHT_EPSILON,
            None => true,
        };
        others_clean && total_ok
    }

    /// Split primary traffic evenly across primary pods
    pub fn rebalance_even(&mut self) {
        let primary = self.primary_service.clone();
        let count = self.primary_pods().count();
        let share = if count == 0 { 0.0 } else { 100.0 / count as f64 };

        for pod in self.nodes.iter_mut().flat_map(|n| n.pods.iter_mut()) {
            pod.traffic_weight = if pod.service == primary {
                Some(share)
            } else {
                None
            };
        }
    }

    /// Scale stable primary pods proportionally so they carry `total` percent
    fn scale_stable_to(&mut self, total: f64) {
        let primary = self.primary_service.clone();
        let stable: Vec<(String, f64)> = self
            .primary_pods()
            .filter(|p| !p.is_canary)
            .map(|p| (p.name.clone(), p.traffic_weight.unwrap_or(0.0)))
            .collect();
        if stable.is_empty() {
            return;
        }

        let current: f64 = stable.iter().map(|(_, w)| w).sum();
        let even = total / stable.len() as f64;

        for pod in self.nodes.iter_mut().flat_map(|n| n.pods.iter_mut()) {
            if pod.service != primary || pod.is_canary {
                continue;
            }
            let weight = if current > WEIGHT_EPSILON {
                pod.traffic_weight.unwrap_or(0.0) * total / current
            } else {
                even
            };
            pod.traffic_weight = Some(weight);
        }
    }

    fn least_loaded_node(&self) -> usize {
        self.nodes
            .iter()
            .enumerate()
            .min_by_key(|(_, n)| (n.pods.len(), n.cpu_requested_millicores()))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    fn primary_seed(&self) -> ServiceSeed {
        self.services
            .iter()
            .find(|s| s.name == self.primary_service)
            .cloned()
            .unwrap_or_else(|| ServiceSeed::new(self.primary_service.clone(), 1))
    }

    /// Schedule a canary pod of the primary service carrying `weight` percent.
    /// Stable primary pods are scaled down to `100 - weight`.
    pub fn add_canary<R: Rng + ?Sized>(&mut self, version: &str, weight: f64, rng: &mut R) -> String {
        let weight = weight.clamp(0.0, 100.0);
        let seed = self.primary_seed();
        let node_index = self.least_loaded_node();

        let name = format!("{}-canary-{}", seed.name, rng::name_suffix(rng, 5));
        let pod = Pod {
            name: name.clone(),
            service: seed.name.clone(),
            status: PodStatus::Running,
            cpu_request_millicores: seed.cpu_request_millicores,
            memory_request_mib: seed.memory_request_mib,
            ip: rng::pod_ip(rng, node_index),
            version: version.to_string(),
            is_canary: true,
            traffic_weight: Some(weight),
            restarts: 0,
        };

        self.scale_stable_to(100.0 - weight);
        self.nodes[node_index].pods.push(pod);
        name
    }

    /// Remove every canary pod and restore an even split. Returns the number removed.
    pub fn remove_canaries(&mut self) -> usize {
        let mut removed = 0;
        for node in &mut self.nodes {
            let before = node.pods.len();
            node.pods.retain(|p| !p.is_canary);
            removed += before - node.pods.len();
        }
        self.rebalance_even();
        removed
    }

    /// Replace stable primary pods with pods running `version`, drop canaries
    /// and split traffic evenly.
    pub fn promote<R: Rng + ?Sized>(&mut self, version: &str, rng: &mut R) {
        let seed = self.primary_seed();
        let hash = rng::template_hash(rng);
        let primary = self.primary_service.clone();

        for node_index in 0..self.nodes.len() {
            let stable = self.nodes[node_index]
                .pods
                .iter()
                .filter(|p| p.service == primary && !p.is_canary)
                .count();
            self.nodes[node_index]
                .pods
                .retain(|p| p.service != primary || p.is_canary);
            for _ in 0..stable {
                let pod = stable_pod(&seed, &hash, version, node_index, rng);
                self.nodes[node_index].pods.push(pod);
            }
        }

        self.current_version = version.to_string();
        self.remove_canaries();
    }

    /// Give a pod a fresh IP that differs from its current one
    pub fn reassign_ip<R: Rng + ?Sized>(&mut self, pod_name: &str, rng: &mut R) -> Option<String> {
        let node_index = self.node_index_of(pod_name)?;
        let pod = self.pod_mut(pod_name)?;
        let mut ip = rng::pod_ip(rng, node_index);
        while ip == pod.ip {
            ip = rng::pod_ip(rng, node_index);
        }
        pod.ip = ip.clone();
        Some(ip)
    }

    /// Cluster IP assigned to a service, stable across snapshots
    pub fn service_ip(&self, service: &str) -> Option<String> {
        self.services
            .iter()
            .position(|s| s.name == service)
            .map(|i| format!("10.96.0.{}", 10 + i))
    }
}

fn stable_pod<R: Rng + ?Sized>(
    service: &ServiceSeed,
    hash: &str,
    version: &str,
    node_index: usize,
    rng: &mut R,
) -> Pod {
    Pod {
        name: format!("{}-{}-{}", service.name, hash, rng::name_suffix(rng, 5)),
        service: service.name.clone(),
        status: PodStatus::Running,
        cpu_request_millicores: service.cpu_request_millicores,
        memory_request_mib: service.memory_request_mib,
        ip: rng::pod_ip(rng, node_index),
        version: version.to_string(),
        is_canary: false,
        traffic_weight: None,
        restarts: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::seeded;

    fn cluster() -> Cluster {
        Cluster::builtin(&mut seeded(Some(42)))
    }

    #[test]
    fn test_builtin_layout() {
        let cluster = cluster();
        assert_eq!(cluster.nodes.len(), 3);
        assert_eq!(cluster.pod_count(), 7);
        assert_eq!(cluster.primary_service, "homepage");
        assert_eq!(cluster.primary_pods().count(), 3);
        assert!(cluster.pods().all(|p| p.status == PodStatus::Running));
    }

    #[test]
    fn test_even_weights_sum_to_100() {
        let cluster = cluster();
        let total = cluster.traffic_weight_total().unwrap();
        assert!((total - 100.0).abs() < WEIGHT_EPSILON);
        assert!(cluster.weights_consistent());
        assert!(cluster
            .pods()
            .filter(|p| p.service != "homepage")
            .all(|p| p.traffic_weight.is_none()));
    }

    #[test]
    fn test_add_canary_scales_stable_pods() {
        let mut rng = seeded(Some(1));
        let mut cluster = Cluster::builtin(&mut rng);

        let name = cluster.add_canary("v1.5.0", 20.0, &mut rng);

        let canary: Vec<_> = cluster.canary_pods().collect();
        assert_eq!(canary.len(), 1);
        assert_eq!(canary[0].name, name);
        assert_eq!(canary[0].traffic_weight, Some(20.0));
        assert_eq!(canary[0].version, "v1.5.0");

        let stable: f64 = cluster
            .primary_pods()
            .filter(|p| !p.is_canary)
            .map(|p| p.traffic_weight.unwrap())
            .sum();
        assert!((stable - 80.0).abs() < WEIGHT_EPSILON);
        assert!(cluster.weights_consistent());
    }

    #[test]
    fn test_zero_weight_canary_keeps_stable_at_100() {
        let mut rng = seeded(Some(2));
        let mut cluster = Cluster::builtin(&mut rng);
        cluster.add_canary("v2.0.0", 0.0, &mut rng);
        assert!(cluster.weights_consistent());
        assert_eq!(cluster.canary_count(), 1);
    }

    #[test]
    fn test_remove_canaries_restores_even_split() {
        let mut rng = seeded(Some(3));
        let mut cluster = Cluster::builtin(&mut rng);
        cluster.add_canary("v1.5.0", 30.0, &mut rng);

        assert_eq!(cluster.remove_canaries(), 1);
        assert_eq!(cluster.canary_count(), 0);
        for pod in cluster.primary_pods() {
            assert!((pod.traffic_weight.unwrap() - 100.0 / 3.0).abs() < WEIGHT_EPSILON);
        }
    }

    #[test]
    fn test_promote_replaces_stable_pods() {
        let mut rng = seeded(Some(4));
        let mut cluster = Cluster::builtin(&mut rng);
        let old: Vec<String> = cluster.primary_pods().map(|p| p.name.clone()).collect();
        let other_before = cluster.pods().filter(|p| p.service != "homepage").count();
        cluster.add_canary("v1.5.0", 10.0, &mut rng);

        cluster.promote("v1.5.0", &mut rng);

        assert_eq!(cluster.current_version, "v1.5.0");
        assert_eq!(cluster.canary_count(), 0);
        assert_eq!(cluster.primary_pods().count(), 3);
        assert!(cluster.primary_pods().all(|p| p.version == "v1.5.0"));
        assert!(cluster.primary_pods().all(|p| !old.contains(&p.name)));
        assert_eq!(
            cluster.pods().filter(|p| p.service != "homepage").count(),
            other_before
        );
        assert!(cluster.weights_consistent());
    }

    #[test]
    fn test_find_pod_by_substring() {
        let cluster = cluster();
        let (node, pod) = cluster.find_pod("redis").unwrap();
        assert_eq!(pod.service, "redis-cache");
        assert!(node.pods.iter().any(|p| p.name == pod.name));
        assert!(cluster.find_pod("does-not-exist").is_none());
    }

    #[test]
    fn test_reassign_ip_changes_ip() {
        let mut rng = seeded(Some(5));
        let mut cluster = Cluster::builtin(&mut rng);
        let name = cluster.pod_names()[0].clone();
        let before = cluster.find_pod(&name).unwrap().1.ip.clone();

        let after = cluster.reassign_ip(&name, &mut rng).unwrap();

        assert_ne!(before, after);
        assert_eq!(cluster.find_pod(&name).unwrap().1.ip, after);
    }

    #[test]
    fn test_seed_with_custom_services() {
        let mut rng = seeded(Some(6));
        let services = vec![
            ServiceSeed::new("storefront", 3),
            ServiceSeed::new("payments", 2),
            ServiceSeed::new("ledger", 1),
        ];
        let cluster = Cluster::seed(services, "v0.9.0", &mut rng);
        assert_eq!(cluster.primary_service, "storefront");
        assert_eq!(cluster.pod_count(), 6);
        assert!(cluster.weights_consistent());
        assert_eq!(cluster.service_ip("payments").as_deref(), Some("10.96.0.11"));
    }
}
