//! Diagnostic primitives.
//!
//! A primitive is a named, stateless, read-only operation that turns the
//! shared context into facts. It carries no incident semantics; which
//! primitives run for an incident is decided by the strategy table.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde_json::Value;

use crate::core::context::SharedContext;
use crate::core::types::{Facts, PrimitiveKind};
use crate::io::cloud::CloudApi;
use crate::io::orchestrator::OrchestratorApi;

pub mod changes;
pub mod metrics;
pub mod network;
pub mod registry;
pub mod scaling;
pub mod workloads;

pub use registry::{PrimitiveRegistry, RegistryBuilder};

/// The single capability every primitive shares.
///
/// Errors are returned, never raised; the executor turns them into failed
/// results.
pub trait Primitive: Send + Sync {
    fn kind(&self) -> PrimitiveKind;
    fn execute(&self, context: &SharedContext) -> Result<Facts>;
}

/// Serialize a typed fact struct into a fact map.
pub(crate) fn to_facts<T: Serialize>(value: &T) -> Result<Facts> {
    match serde_json::to_value(value).context("serialize facts")? {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!("facts must serialize to an object, got {other}")),
    }
}

/// Builder with one implementation per [`PrimitiveKind`].
pub fn standard_registry(
    cloud: Arc<dyn CloudApi>,
    orchestrator: Arc<dyn OrchestratorApi>,
) -> RegistryBuilder {
    use PrimitiveKind as P;
    use metrics::SeriesAnalysis;

    RegistryBuilder::new()
        .register(Arc::new(SeriesAnalysis::from_context(
            P::AnalyzeUtilization,
            cloud.clone(),
            "cpu",
        )))
        .register(Arc::new(metrics::BaselineComparison::new(cloud.clone())))
        .register(Arc::new(SeriesAnalysis::fixed(P::AnalyzeLatency, cloud.clone(), "latency")))
        .register(Arc::new(SeriesAnalysis::fixed(P::AnalyzeErrorRate, cloud.clone(), "errors")))
        .register(Arc::new(SeriesAnalysis::fixed(
            P::AnalyzeQueryPerformance,
            cloud.clone(),
            "query_latency",
        )))
        .register(Arc::new(SeriesAnalysis::fixed(
            P::CheckReplicationLag,
            cloud.clone(),
            "replication_lag",
        )))
        .register(Arc::new(SeriesAnalysis::fixed(
            P::EvaluateThrottling,
            cloud.clone(),
            "throttles",
        )))
        .register(Arc::new(metrics::CostTrend::new(cloud.clone())))
        .register(Arc::new(changes::RecentChanges::new(cloud.clone())))
        .register(Arc::new(changes::ConfigurationDiff::new(cloud.clone())))
        .register(Arc::new(changes::PermissionAudit::new(cloud.clone())))
        .register(Arc::new(scaling::ScalingBehavior::new(cloud.clone())))
        .register(Arc::new(scaling::ScalingLimits::new(cloud.clone())))
        .register(Arc::new(scaling::ConfigurationValidation::new(cloud.clone())))
        .register(Arc::new(network::TraceDependencies::new(cloud.clone())))
        .register(Arc::new(network::CheckConnectivity::new(cloud.clone())))
        .register(Arc::new(network::SecurityGroups::new(cloud.clone())))
        .register(Arc::new(network::NetworkAcls::new(cloud)))
        .register(Arc::new(workloads::TopConsumers::new(orchestrator.clone())))
        .register(Arc::new(workloads::DependencyHealth::new(orchestrator.clone())))
        .register(Arc::new(workloads::ResourceStatus::new(orchestrator.clone())))
        .register(Arc::new(workloads::HealthChecks::new(orchestrator.clone())))
        .register(Arc::new(workloads::DeploymentStatus::new(orchestrator.clone())))
        .register(Arc::new(workloads::CompareVersions::new(orchestrator)))
}
