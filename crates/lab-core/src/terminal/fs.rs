//! Read-only virtual filesystem behind `ls`, `cat` and `pwd`

use std::collections::BTreeMap;

pub const HOME: &str = "/home/visitor";

const README: &str = "\
# DevOps Lab

Everything here is simulated. Try:
  kubectl get pods
  deploy --strategy canary --weight 20
  chaos pod_failure
  status";

const DEPLOYMENT_YAML: &str = "\
apiVersion: apps/v1
kind: Deployment
metadata:
  name: homepage
  namespace: default
spec:
  replicas: 3
  strategy:
    type: RollingUpdate
  template:
    spec:
      containers:
        - name: homepage
          image: registry.lab.local/homepage:v1.4.2
          resources:
            requests:
              cpu: 250m
              memory: 256Mi";

const SERVICE_YAML: &str = "\
apiVersion: v1
kind: Service
metadata:
  name: homepage
spec:
  selector:
    app: homepage
  ports:
    - port: 80
      targetPort: 8080";

const PIPELINE_YML: &str = "\
stages:
  - source
  - build
  - test
  - staging
  - canary    # waits for promote or rollback
  - production";

const NOTES: &str = "\
- canary analysis: lower is better for latency, error rate and cpu
- auto-chaos fires a random experiment every 20s";

const HOSTNAME: &str = "lab-console";

const OS_RELEASE: &str = "\
NAME=\"DevOps Lab\"
ID=devops-lab
VERSION_ID=1.0";

pub struct VirtualFs {
    files: BTreeMap<&'static str, &'static str>,
}

impl Default for VirtualFs {
    fn default() -> Self {
        Self::builtin()
    }
}

impl VirtualFs {
    pub fn builtin() -> Self {
        let files = BTreeMap::from([
            ("/home/visitor/README.md", README),
            ("/home/visitor/notes.txt", NOTES),
            ("/home/visitor/pipeline.yml", PIPELINE_YML),
            ("/home/visitor/k8s/deployment.yaml", DEPLOYMENT_YAML),
            ("/home/visitor/k8s/service.yaml", SERVICE_YAML),
            ("/etc/hostname", HOSTNAME),
            ("/etc/os-release", OS_RELEASE),
        ]);
        Self { files }
    }

    /// Absolute, normalized form of `path` relative to the home directory
    pub fn resolve(path: &str) -> String {
        let expanded = if path == "~" {
            HOME.to_string()
        } else if let Some(rest) = path.strip_prefix("~/") {
            format!("{HOME}/{rest}")
        } else if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{HOME}/{path}")
        };

        let mut parts: Vec<&str> = Vec::new();
        for part in expanded.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                p => parts.push(p),
            }
        }
        format!("/{}", parts.join("/"))
    }

    pub fn read(&self, path: &str) -> Option<&'static str> {
        self.files.get(Self::resolve(path).as_str()).copied()
    }

    pub fn is_dir(&self, path: &str) -> bool {
        let dir = Self::resolve(path);
        let prefix = if dir == "/" { "/".to_string() } else { format!("{dir}/") };
        self.files.keys().any(|f| f.starts_with(&prefix))
    }

    /// Entries directly under `path`; directories carry a trailing `/`
    pub fn list(&self, path: &str) -> Option<Vec<String>> {
        let dir = Self::resolve(path);
        if self.files.contains_key(dir.as_str()) {
            let name = dir.rsplit('/').next().unwrap_or_default();
            return Some(vec![name.to_string()]);
        }
        if !self.is_dir(&dir) {
            return None;
        }

        let prefix = if dir == "/" { "/".to_string() } else { format!("{dir}/") };
        let mut entries: Vec<String> = Vec::new();
        for file in self.files.keys() {
            let Some(rest) = file.strip_prefix(prefix.as_str()) else {
                continue;
            };
            let entry = match rest.split_once('/') {
                Some((sub, _)) => format!("{sub}/"),
                None => rest.to_string(),
            };
            if !entries.contains(&entry) {
                entries.push(entry);
            }
        }
        entries.sort();
        Some(entries)
    }
}
