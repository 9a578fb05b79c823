//! Orchestrator collaborator contract and its `kubectl` implementation.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use crate::io::process::run_json;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceSelector {
    All,
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterNode {
    pub name: String,
    pub ready: bool,
    pub cpu_allocatable: Option<String>,
    pub memory_allocatable: Option<String>,
    /// Pressure conditions currently true (MemoryPressure, DiskPressure, ...).
    pub pressure: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Workload {
    pub name: String,
    pub namespace: String,
    /// Pod phase: Pending, Running, Succeeded, Failed, Unknown.
    pub phase: String,
    /// Every container reports ready.
    pub ready: bool,
    pub restarts: u32,
    pub cpu_request_cores: f64,
    pub memory_request: Option<String>,
    pub node: Option<String>,
}

impl Workload {
    pub fn is_settled(&self) -> bool {
        matches!(self.phase.as_str(), "Running" | "Succeeded")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Deployment {
    pub name: String,
    pub namespace: String,
    pub desired_replicas: u32,
    pub ready_replicas: u32,
    pub available_replicas: u32,
    pub updated_replicas: u32,
    pub images: Vec<String>,
    pub revision: Option<String>,
    pub created: Option<DateTime<Utc>>,
    /// Latest condition transition, a proxy for the last rollout.
    pub last_update: Option<DateTime<Utc>>,
}

impl Deployment {
    pub fn is_rolled_out(&self) -> bool {
        self.ready_replicas >= self.desired_replicas
            && self.updated_replicas >= self.desired_replicas
    }
}

/// Read-only cluster capabilities consumed by primitives.
pub trait OrchestratorApi: Send + Sync {
    fn list_nodes(&self) -> Result<Vec<ClusterNode>>;
    fn list_workloads(&self, namespace: &NamespaceSelector) -> Result<Vec<Workload>>;
    fn list_deployments(&self, namespace: &NamespaceSelector) -> Result<Vec<Deployment>>;
}

#[derive(Debug, Clone)]
pub struct KubectlOrchestrator {
    command: Vec<String>,
    context: Option<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl KubectlOrchestrator {
    pub fn new(
        command: Vec<String>,
        context: Option<String>,
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            command,
            context,
            timeout,
            output_limit_bytes,
        }
    }

    fn argv(&self, resource: &str, namespace: Option<&NamespaceSelector>) -> Vec<String> {
        let mut argv = self.command.clone();
        if let Some(context) = &self.context {
            argv.extend(["--context".to_string(), context.clone()]);
        }
        argv.extend(["get".to_string(), resource.to_string()]);
        match namespace {
            Some(NamespaceSelector::All) => argv.push("--all-namespaces".to_string()),
            Some(NamespaceSelector::Named(ns)) => {
                argv.extend(["--namespace".to_string(), ns.clone()]);
            }
            None => {}
        }
        argv.extend(["-o".to_string(), "json".to_string()]);
        argv
    }

    #[instrument(skip(self))]
    fn get(&self, resource: &str, namespace: Option<&NamespaceSelector>) -> Result<Value> {
        run_json(
            &self.argv(resource, namespace),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("kubectl get {resource}"))
    }
}

impl OrchestratorApi for KubectlOrchestrator {
    fn list_nodes(&self) -> Result<Vec<ClusterNode>> {
        parse_nodes(self.get("nodes", None)?)
    }

    fn list_workloads(&self, namespace: &NamespaceSelector) -> Result<Vec<Workload>> {
        parse_pods(self.get("pods", Some(namespace))?)
    }

    fn list_deployments(&self, namespace: &NamespaceSelector) -> Result<Vec<Deployment>> {
        parse_deployments(self.get("deployments", Some(namespace))?)
    }
}

#[derive(Deserialize)]
struct List<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Metadata {
    #[serde(default)]
    name: String,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    annotations: std::collections::BTreeMap<String, String>,
}

#[derive(Deserialize, Default)]
struct Condition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
    #[serde(default, rename = "lastUpdateTime")]
    last_update_time: Option<DateTime<Utc>>,
    #[serde(default, rename = "lastTransitionTime")]
    last_transition_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct RawNode {
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    status: RawNodeStatus,
}

#[derive(Deserialize, Default)]
struct RawNodeStatus {
    #[serde(default)]
    allocatable: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    conditions: Vec<Condition>,
}

pub fn parse_nodes(value: Value) -> Result<Vec<ClusterNode>> {
    let list: List<RawNode> = serde_json::from_value(value).context("parse node list")?;
    Ok(list
        .items
        .into_iter()
        .map(|node| {
            let ready = node
                .status
                .conditions
                .iter()
                .any(|c| c.kind == "Ready" && c.status == "True");
            let pressure = node
                .status
                .conditions
                .iter()
                .filter(|c| c.kind != "Ready" && c.status == "True")
                .map(|c| c.kind.clone())
                .collect();
            ClusterNode {
                name: node.metadata.name,
                ready,
                cpu_allocatable: node.status.allocatable.get("cpu").cloned(),
                memory_allocatable: node.status.allocatable.get("memory").cloned(),
                pressure,
            }
        })
        .collect())
}

#[derive(Deserialize)]
struct RawPod {
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    spec: RawPodSpec,
    #[serde(default)]
    status: RawPodStatus,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawPodSpec {
    #[serde(default)]
    node_name: Option<String>,
    #[serde(default)]
    containers: Vec<RawContainer>,
}

#[derive(Deserialize)]
struct RawContainer {
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    resources: RawResources,
}

#[derive(Deserialize, Default)]
struct RawResources {
    #[serde(default)]
    requests: std::collections::BTreeMap<String, String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawPodStatus {
    #[serde(default)]
    phase: Option<String>,
    #[serde(default)]
    container_statuses: Vec<RawContainerStatus>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawContainerStatus {
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    restart_count: u32,
}

/// Parse a CPU quantity (`"250m"`, `"1.5"`) into cores.
pub fn parse_cpu_quantity(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    match raw.strip_suffix('m') {
        Some(millis) => millis.parse::<f64>().ok().map(|m| m / 1000.0),
        None => raw.parse().ok(),
    }
}

pub fn parse_pods(value: Value) -> Result<Vec<Workload>> {
    let list: List<RawPod> = serde_json::from_value(value).context("parse pod list")?;
    Ok(list
        .items
        .into_iter()
        .map(|pod| {
            let cpu_request_cores = pod
                .spec
                .containers
                .iter()
                .filter_map(|c| c.resources.requests.get("cpu"))
                .filter_map(|q| parse_cpu_quantity(q))
                .sum();
            let memory_request = pod
                .spec
                .containers
                .iter()
                .find_map(|c| c.resources.requests.get("memory").cloned());
            let statuses = &pod.status.container_statuses;
            Workload {
                name: pod.metadata.name,
                namespace: pod
                    .metadata
                    .namespace
                    .unwrap_or_else(|| "default".to_string()),
                phase: pod.status.phase.unwrap_or_else(|| "Unknown".to_string()),
                ready: !statuses.is_empty() && statuses.iter().all(|s| s.ready),
                restarts: statuses.iter().map(|s| s.restart_count).sum(),
                cpu_request_cores,
                memory_request,
                node: pod.spec.node_name,
            }
        })
        .collect())
}

#[derive(Deserialize)]
struct RawDeployment {
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    spec: RawDeploymentSpec,
    #[serde(default)]
    status: RawDeploymentStatus,
}

#[derive(Deserialize, Default)]
struct RawDeploymentSpec {
    #[serde(default)]
    replicas: Option<u32>,
    #[serde(default)]
    template: RawTemplate,
}

#[derive(Deserialize, Default)]
struct RawTemplate {
    #[serde(default)]
    spec: RawPodSpec,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawDeploymentStatus {
    #[serde(default)]
    ready_replicas: u32,
    #[serde(default)]
    available_replicas: u32,
    #[serde(default)]
    updated_replicas: u32,
    #[serde(default)]
    conditions: Vec<Condition>,
}

pub fn parse_deployments(value: Value) -> Result<Vec<Deployment>> {
    let list: List<RawDeployment> =
        serde_json::from_value(value).context("parse deployment list")?;
    Ok(list
        .items
        .into_iter()
        .map(|dep| {
            let last_update = dep
                .status
                .conditions
                .iter()
                .filter_map(|c| c.last_update_time.or(c.last_transition_time))
                .max();
            Deployment {
                revision: dep
                    .metadata
                    .annotations
                    .get("deployment.kubernetes.io/revision")
                    .cloned(),
                name: dep.metadata.name,
                namespace: dep
                    .metadata
                    .namespace
                    .unwrap_or_else(|| "default".to_string()),
                desired_replicas: dep.spec.replicas.unwrap_or(1),
                ready_replicas: dep.status.ready_replicas,
                available_replicas: dep.status.available_replicas,
                updated_replicas: dep.status.updated_replicas,
                images: dep
                    .spec
                    .template
                    .spec
                    .containers
                    .into_iter()
                    .filter_map(|c| c.image)
                    .collect(),
                created: dep.metadata.creation_timestamp,
                last_update,
            }
        })
        .collect())
}
