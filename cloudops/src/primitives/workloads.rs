//! Cluster workload primitives.
//!
//! These query every namespace; the classifier extracts no namespace.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use serde_json::json;

use crate::core::context::SharedContext;
use crate::core::types::{Facts, PrimitiveKind};
use crate::io::orchestrator::{NamespaceSelector, OrchestratorApi, Workload};

use super::{Primitive, to_facts};

const TOP_CONSUMERS: usize = 5;

fn workload_ref(workload: &Workload) -> serde_json::Value {
    json!({
        "name": workload.name,
        "namespace": workload.namespace,
        "phase": workload.phase,
        "ready": workload.ready,
        "restarts": workload.restarts,
    })
}

pub struct TopConsumers {
    orchestrator: Arc<dyn OrchestratorApi>,
}

impl TopConsumers {
    pub fn new(orchestrator: Arc<dyn OrchestratorApi>) -> Self {
        Self { orchestrator }
    }
}

impl Primitive for TopConsumers {
    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::FindTopConsumers
    }

    fn execute(&self, _context: &SharedContext) -> Result<Facts> {
        let mut workloads = self.orchestrator.list_workloads(&NamespaceSelector::All)?;
        workloads.sort_by(|a, b| {
            b.cpu_request_cores
                .total_cmp(&a.cpu_request_cores)
                .then_with(|| a.name.cmp(&b.name))
        });
        let total: f64 = workloads.iter().map(|w| w.cpu_request_cores).sum();
        let facts = json!({
            "workload_count": workloads.len(),
            "total_cpu_request_cores": (total * 1000.0).round() / 1000.0,
            "top_consumers": workloads.iter().take(TOP_CONSUMERS).map(|w| json!({
                "name": w.name,
                "namespace": w.namespace,
                "cpu_request_cores": w.cpu_request_cores,
                "memory_request": w.memory_request,
                "node": w.node,
            })).collect::<Vec<_>>(),
        });
        to_facts(&facts)
    }
}

/// Workloads that are not ready or have restarted.
pub struct DependencyHealth {
    orchestrator: Arc<dyn OrchestratorApi>,
}

impl DependencyHealth {
    pub fn new(orchestrator: Arc<dyn OrchestratorApi>) -> Self {
        Self { orchestrator }
    }
}

impl Primitive for DependencyHealth {
    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::CheckDependencyHealth
    }

    fn execute(&self, _context: &SharedContext) -> Result<Facts> {
        let workloads = self.orchestrator.list_workloads(&NamespaceSelector::All)?;
        let unhealthy: Vec<&Workload> = workloads
            .iter()
            .filter(|w| w.phase != "Succeeded" && (!w.ready || w.restarts > 0))
            .collect();
        let facts = json!({
            "workload_count": workloads.len(),
            "unhealthy_count": unhealthy.len(),
            "unhealthy": unhealthy.iter().map(|w| workload_ref(w)).collect::<Vec<_>>(),
            "total_restarts": workloads.iter().map(|w| u64::from(w.restarts)).sum::<u64>(),
        });
        to_facts(&facts)
    }
}

pub struct ResourceStatus {
    orchestrator: Arc<dyn OrchestratorApi>,
}

impl ResourceStatus {
    pub fn new(orchestrator: Arc<dyn OrchestratorApi>) -> Self {
        Self { orchestrator }
    }
}

impl Primitive for ResourceStatus {
    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::CheckResourceStatus
    }

    fn execute(&self, _context: &SharedContext) -> Result<Facts> {
        let nodes = self.orchestrator.list_nodes()?;
        let workloads = self.orchestrator.list_workloads(&NamespaceSelector::All)?;
        let ready_nodes = nodes.iter().filter(|n| n.ready).count();
        let facts = json!({
            "node_count": nodes.len(),
            "ready_nodes": ready_nodes,
            "not_ready_nodes": nodes.iter().filter(|n| !n.ready).map(|n| &n.name).collect::<Vec<_>>(),
            "nodes_under_pressure": nodes.iter().filter(|n| !n.pressure.is_empty()).map(|n| json!({
                "name": n.name,
                "conditions": n.pressure,
            })).collect::<Vec<_>>(),
            "workload_count": workloads.len(),
            "non_running_workloads": workloads.iter()
                .filter(|w| !w.is_settled())
                .map(workload_ref)
                .collect::<Vec<_>>(),
        });
        to_facts(&facts)
    }
}

/// Running workloads whose readiness checks fail.
pub struct HealthChecks {
    orchestrator: Arc<dyn OrchestratorApi>,
}

impl HealthChecks {
    pub fn new(orchestrator: Arc<dyn OrchestratorApi>) -> Self {
        Self { orchestrator }
    }
}

impl Primitive for HealthChecks {
    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::CheckHealthChecks
    }

    fn execute(&self, _context: &SharedContext) -> Result<Facts> {
        let workloads = self.orchestrator.list_workloads(&NamespaceSelector::All)?;
        let running: Vec<&Workload> = workloads.iter().filter(|w| w.phase == "Running").collect();
        let failing: Vec<&Workload> = running.iter().copied().filter(|w| !w.ready).collect();
        let facts = json!({
            "checked": running.len(),
            "failing_count": failing.len(),
            "failing": failing.iter().map(|w| workload_ref(w)).collect::<Vec<_>>(),
            "all_passing": failing.is_empty(),
        });
        to_facts(&facts)
    }
}

pub struct DeploymentStatus {
    orchestrator: Arc<dyn OrchestratorApi>,
}

impl DeploymentStatus {
    pub fn new(orchestrator: Arc<dyn OrchestratorApi>) -> Self {
        Self { orchestrator }
    }
}

impl Primitive for DeploymentStatus {
    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::CheckDeploymentStatus
    }

    fn execute(&self, _context: &SharedContext) -> Result<Facts> {
        let deployments = self.orchestrator.list_deployments(&NamespaceSelector::All)?;
        let degraded: Vec<_> = deployments
            .iter()
            .filter(|d| d.ready_replicas < d.desired_replicas)
            .map(|d| {
                json!({
                    "name": d.name,
                    "namespace": d.namespace,
                    "desired": d.desired_replicas,
                    "ready": d.ready_replicas,
                    "available": d.available_replicas,
                    "updated": d.updated_replicas,
                })
            })
            .collect();
        let facts = json!({
            "deployment_count": deployments.len(),
            "degraded_count": degraded.len(),
            "degraded": degraded,
            "all_rolled_out": deployments.iter().all(|d| d.is_rolled_out()),
        });
        to_facts(&facts)
    }
}

/// Deployments rolled within the lookback window and the images they run.
pub struct CompareVersions {
    orchestrator: Arc<dyn OrchestratorApi>,
}

impl CompareVersions {
    pub fn new(orchestrator: Arc<dyn OrchestratorApi>) -> Self {
        Self { orchestrator }
    }
}

impl Primitive for CompareVersions {
    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::CompareVersions
    }

    fn execute(&self, context: &SharedContext) -> Result<Facts> {
        let deployments = self.orchestrator.list_deployments(&NamespaceSelector::All)?;
        let cutoff = Utc::now() - Duration::hours(i64::from(context.lookback_hours));
        let recent: Vec<_> = deployments
            .iter()
            .filter(|d| d.last_update.is_some_and(|at| at >= cutoff))
            .map(|d| {
                json!({
                    "name": d.name,
                    "namespace": d.namespace,
                    "images": d.images,
                    "revision": d.revision,
                    "updated_at": d.last_update,
                })
            })
            .collect();
        let versions: BTreeMap<String, &Vec<String>> = deployments
            .iter()
            .map(|d| (format!("{}/{}", d.namespace, d.name), &d.images))
            .collect();
        let facts = json!({
            "lookback_hours": context.lookback_hours,
            "recent_rollout_count": recent.len(),
            "recent_rollouts": recent,
            "versions": versions,
        });
        to_facts(&facts)
    }
}
