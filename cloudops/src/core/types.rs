//! Shared deterministic types for the investigation pipeline.
//!
//! These types are the contracts between classifier, composer, executor and
//! interpreter. They carry no I/O and serialize to stable JSON.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::context::SharedContext;

/// Structured facts produced by a primitive.
pub type Facts = serde_json::Map<String, serde_json::Value>;

/// Name that failed to parse into one of the closed enumerations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownName {
    pub kind: &'static str,
    pub value: String,
}

/// Fundamental failure modes shared by every cloud service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentClass {
    ResourceSaturation,
    LoadSpike,
    ConfigurationDrift,
    DependencyFailure,
    ScalingFailure,
    NetworkConnectivity,
    PermissionFailure,
    CostAnomaly,
    DeploymentRegression,
    AvailabilityLoss,
    PerformanceDegradation,
    DataInconsistency,
}

impl IncidentClass {
    pub const ALL: [IncidentClass; 12] = [
        IncidentClass::ResourceSaturation,
        IncidentClass::LoadSpike,
        IncidentClass::ConfigurationDrift,
        IncidentClass::DependencyFailure,
        IncidentClass::ScalingFailure,
        IncidentClass::NetworkConnectivity,
        IncidentClass::PermissionFailure,
        IncidentClass::CostAnomaly,
        IncidentClass::DeploymentRegression,
        IncidentClass::AvailabilityLoss,
        IncidentClass::PerformanceDegradation,
        IncidentClass::DataInconsistency,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            IncidentClass::ResourceSaturation => "resource_saturation",
            IncidentClass::LoadSpike => "load_spike",
            IncidentClass::ConfigurationDrift => "configuration_drift",
            IncidentClass::DependencyFailure => "dependency_failure",
            IncidentClass::ScalingFailure => "scaling_failure",
            IncidentClass::NetworkConnectivity => "network_connectivity",
            IncidentClass::PermissionFailure => "permission_failure",
            IncidentClass::CostAnomaly => "cost_anomaly",
            IncidentClass::DeploymentRegression => "deployment_regression",
            IncidentClass::AvailabilityLoss => "availability_loss",
            IncidentClass::PerformanceDegradation => "performance_degradation",
            IncidentClass::DataInconsistency => "data_inconsistency",
        }
    }

    /// One-line meaning, rendered into the classification prompt.
    pub fn description(self) -> &'static str {
        match self {
            IncidentClass::ResourceSaturation => "CPU, memory, disk, connections exhausted",
            IncidentClass::LoadSpike => "Sudden traffic/request increase",
            IncidentClass::ConfigurationDrift => "Settings changed from baseline",
            IncidentClass::DependencyFailure => "Upstream/downstream service unavailable",
            IncidentClass::ScalingFailure => "Auto-scaling not working",
            IncidentClass::NetworkConnectivity => "Network path broken",
            IncidentClass::PermissionFailure => "IAM/RBAC denying access",
            IncidentClass::CostAnomaly => "Unexpected spend increase",
            IncidentClass::DeploymentRegression => "New version causing issues",
            IncidentClass::AvailabilityLoss => "Service/resource down",
            IncidentClass::PerformanceDegradation => "Slow but not saturated",
            IncidentClass::DataInconsistency => "Replication lag, corruption",
        }
    }
}

impl fmt::Display for IncidentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IncidentClass {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        IncidentClass::ALL
            .into_iter()
            .find(|class| class.as_str() == needle)
            .ok_or_else(|| UnknownName {
                kind: "incident class",
                value: s.to_string(),
            })
    }
}

/// Risk tier of a step. Ordered from least to most dangerous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Read,
    Write,
    Delete,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Read => "read",
            RiskLevel::Write => "write",
            RiskLevel::Delete => "delete",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "read" => Ok(RiskLevel::Read),
            "write" => Ok(RiskLevel::Write),
            "delete" => Ok(RiskLevel::Delete),
            other => Err(UnknownName {
                kind: "risk level",
                value: other.to_string(),
            }),
        }
    }
}

/// Closed set of diagnostic primitives known to the strategy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveKind {
    AnalyzeUtilization,
    CompareBaseline,
    AnalyzeLatency,
    AnalyzeErrorRate,
    AnalyzeQueryPerformance,
    CheckReplicationLag,
    EvaluateThrottling,
    AnalyzeCostTrend,
    CheckRecentChanges,
    DiffConfiguration,
    CheckPermissions,
    CheckScalingBehavior,
    CheckScalingLimits,
    ValidateConfiguration,
    TraceDependencies,
    CheckConnectivity,
    CheckSecurityGroups,
    CheckNetworkAcls,
    FindTopConsumers,
    CheckDependencyHealth,
    CheckResourceStatus,
    CheckHealthChecks,
    CheckDeploymentStatus,
    CompareVersions,
}

impl PrimitiveKind {
    pub const ALL: [PrimitiveKind; 24] = [
        PrimitiveKind::AnalyzeUtilization,
        PrimitiveKind::CompareBaseline,
        PrimitiveKind::AnalyzeLatency,
        PrimitiveKind::AnalyzeErrorRate,
        PrimitiveKind::AnalyzeQueryPerformance,
        PrimitiveKind::CheckReplicationLag,
        PrimitiveKind::EvaluateThrottling,
        PrimitiveKind::AnalyzeCostTrend,
        PrimitiveKind::CheckRecentChanges,
        PrimitiveKind::DiffConfiguration,
        PrimitiveKind::CheckPermissions,
        PrimitiveKind::CheckScalingBehavior,
        PrimitiveKind::CheckScalingLimits,
        PrimitiveKind::ValidateConfiguration,
        PrimitiveKind::TraceDependencies,
        PrimitiveKind::CheckConnectivity,
        PrimitiveKind::CheckSecurityGroups,
        PrimitiveKind::CheckNetworkAcls,
        PrimitiveKind::FindTopConsumers,
        PrimitiveKind::CheckDependencyHealth,
        PrimitiveKind::CheckResourceStatus,
        PrimitiveKind::CheckHealthChecks,
        PrimitiveKind::CheckDeploymentStatus,
        PrimitiveKind::CompareVersions,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PrimitiveKind::AnalyzeUtilization => "analyze_utilization",
            PrimitiveKind::CompareBaseline => "compare_baseline",
            PrimitiveKind::AnalyzeLatency => "analyze_latency",
            PrimitiveKind::AnalyzeErrorRate => "analyze_error_rate",
            PrimitiveKind::AnalyzeQueryPerformance => "analyze_query_performance",
            PrimitiveKind::CheckReplicationLag => "check_replication_lag",
            PrimitiveKind::EvaluateThrottling => "evaluate_throttling",
            PrimitiveKind::AnalyzeCostTrend => "analyze_cost_trend",
            PrimitiveKind::CheckRecentChanges => "check_recent_changes",
            PrimitiveKind::DiffConfiguration => "diff_configuration",
            PrimitiveKind::CheckPermissions => "check_permissions",
            PrimitiveKind::CheckScalingBehavior => "check_scaling_behavior",
            PrimitiveKind::CheckScalingLimits => "check_scaling_limits",
            PrimitiveKind::ValidateConfiguration => "validate_configuration",
            PrimitiveKind::TraceDependencies => "trace_dependencies",
            PrimitiveKind::CheckConnectivity => "check_connectivity",
            PrimitiveKind::CheckSecurityGroups => "check_security_groups",
            PrimitiveKind::CheckNetworkAcls => "check_network_acls",
            PrimitiveKind::FindTopConsumers => "find_top_consumers",
            PrimitiveKind::CheckDependencyHealth => "check_dependency_health",
            PrimitiveKind::CheckResourceStatus => "check_resource_status",
            PrimitiveKind::CheckHealthChecks => "check_health_checks",
            PrimitiveKind::CheckDeploymentStatus => "check_deployment_status",
            PrimitiveKind::CompareVersions => "compare_versions",
        }
    }

    /// Every primitive only reads from infrastructure.
    pub fn risk_level(self) -> RiskLevel {
        RiskLevel::Read
    }

    /// Rough provider API cost of one invocation, in USD.
    pub fn estimated_cost_usd(self) -> f64 {
        match self {
            PrimitiveKind::CompareBaseline => 0.002,
            PrimitiveKind::AnalyzeUtilization
            | PrimitiveKind::AnalyzeLatency
            | PrimitiveKind::AnalyzeErrorRate
            | PrimitiveKind::AnalyzeQueryPerformance
            | PrimitiveKind::CheckReplicationLag
            | PrimitiveKind::EvaluateThrottling => 0.001,
            PrimitiveKind::AnalyzeCostTrend => 0.01,
            _ => 0.0,
        }
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrimitiveKind {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        PrimitiveKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == needle)
            .ok_or_else(|| UnknownName {
                kind: "primitive",
                value: s.to_string(),
            })
    }
}

/// Validated classification of a free-text query. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub primary_class: IncidentClass,
    /// Ordered, duplicate-free, never contains `primary_class`.
    pub secondary_classes: Vec<IncidentClass>,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub metric: Option<String>,
    pub scope: String,
    /// Investigation window in seconds.
    pub time_window: u64,
}

/// One planned primitive with its risk tier and the approval decision made at
/// plan-build time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanStep {
    pub primitive: PrimitiveKind,
    pub risk_level: RiskLevel,
    pub requires_approval: bool,
}

/// Ordered diagnostic plan for one investigation.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub plan_id: String,
    pub incident_class: IncidentClass,
    pub steps: Vec<PlanStep>,
    /// Enriched by the executor as primitives complete.
    pub shared_context: SharedContext,
    pub estimated_duration_secs: u64,
    /// Strategy descriptions and step order, for `--explain`.
    pub summary: String,
}

impl Plan {
    pub fn primitive_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|step| step.primitive.as_str()).collect()
    }

    pub fn needs_approval(&self) -> bool {
        self.steps.iter().any(|step| step.requires_approval)
    }

    pub fn estimated_cost_usd(&self) -> f64 {
        self.steps
            .iter()
            .map(|step| step.primitive.estimated_cost_usd())
            .sum()
    }
}

/// Outcome of a single primitive invocation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimitiveResult {
    pub primitive_name: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub facts: Facts,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl PrimitiveResult {
    pub fn succeeded(name: &str, context: &SharedContext, facts: Facts, duration_ms: u64) -> Self {
        Self {
            primitive_name: name.to_string(),
            resource_type: context.resource_type_label().to_string(),
            resource_id: context.resource_id.clone(),
            timestamp: Utc::now(),
            facts,
            success: true,
            error: None,
            duration_ms,
        }
    }

    pub fn failed(
        name: &str,
        context: &SharedContext,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            primitive_name: name.to_string(),
            resource_type: context.resource_type_label().to_string(),
            resource_id: context.resource_id.clone(),
            timestamp: Utc::now(),
            facts: Facts::new(),
            success: false,
            error: Some(error.into()),
            duration_ms,
        }
    }
}

/// Terminal status of a plan execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Partial,
    Failed,
}

impl RunStatus {
    /// `failed` iff nothing succeeded, `completed` iff nothing failed.
    ///
    /// An empty run has no successes and is therefore `failed`.
    pub fn from_counts(succeeded: usize, failed: usize) -> Self {
        if succeeded == 0 {
            RunStatus::Failed
        } else if failed == 0 {
            RunStatus::Completed
        } else {
            RunStatus::Partial
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionCounts {
    pub executed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Result of executing a plan, derived from its ordered primitive results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub plan_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub results: Vec<PrimitiveResult>,
    pub counts: ExecutionCounts,
    pub status: RunStatus,
    /// True when the run stopped early on external cancellation.
    pub cancelled: bool,
}

/// Inferred cause with the evidence the reasoning stage cited for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Hypothesis {
    pub cause: String,
    pub confidence: f64,
    pub evidence: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecommendedAction {
    #[serde(rename = "action")]
    pub description: String,
    pub priority: u32,
    #[serde(default)]
    pub command: Option<String>,
}

/// Facts restated, hypotheses proposed, actions recommended. Read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Interpretation {
    pub key_findings: Vec<String>,
    #[serde(rename = "likely_root_causes")]
    pub hypotheses: Vec<Hypothesis>,
    #[serde(rename = "recommended_actions")]
    pub actions: Vec<RecommendedAction>,
    pub confidence: f64,
    pub requires_human_review: bool,
}
