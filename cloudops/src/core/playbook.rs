//! Static playbook catalog for the legacy investigation path.
//!
//! A playbook is matched on the classification's resource type and metric
//! instead of going through the strategy table. Each step names one typed
//! collaborator call; approval flags are fixed when the plan is built.

use serde::Serialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::core::policy::PolicyGate;
use crate::core::types::{Classification, IncidentClass, RiskLevel};
use crate::error::PlaybookError;

const SECONDS_PER_PLAYBOOK_STEP: u64 = 5;

/// Window for a cost breakdown call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CostPeriod {
    #[serde(rename = "LAST_30_DAYS")]
    Last30Days,
    #[serde(rename = "PREVIOUS_30_DAYS")]
    Previous30Days,
}

/// One collaborator call. Every variant is read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum ProviderCall {
    ListNodes,
    CloudwatchGetMetrics { metric: String, period_secs: u64 },
    TopPods,
    ListDeployments { namespace: Option<String> },
    CostExplorerGetCost { period: CostPeriod },
    ListRecentlyCreated { days: u32 },
    Ec2DescribeSecurityGroups,
    AnalyzeSecurityRules,
}

impl ProviderCall {
    pub fn provider(&self) -> &'static str {
        match self {
            ProviderCall::ListNodes | ProviderCall::TopPods | ProviderCall::ListDeployments { .. } => {
                "kubernetes"
            }
            ProviderCall::CloudwatchGetMetrics { .. }
            | ProviderCall::CostExplorerGetCost { .. }
            | ProviderCall::ListRecentlyCreated { .. }
            | ProviderCall::Ec2DescribeSecurityGroups => "aws",
            ProviderCall::AnalyzeSecurityRules => "local",
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            ProviderCall::ListNodes => "list_nodes",
            ProviderCall::CloudwatchGetMetrics { .. } => "cloudwatch_get_metrics",
            ProviderCall::TopPods => "top_pods",
            ProviderCall::ListDeployments { .. } => "list_deployments",
            ProviderCall::CostExplorerGetCost { .. } => "cost_explorer_get_cost",
            ProviderCall::ListRecentlyCreated { .. } => "config_list_resources",
            ProviderCall::Ec2DescribeSecurityGroups => "ec2_describe_security_groups",
            ProviderCall::AnalyzeSecurityRules => "analyze_security_rules",
        }
    }

    /// Call parameters as rendered in plan output.
    pub fn params(&self) -> Value {
        match self {
            ProviderCall::CloudwatchGetMetrics {
                metric,
                period_secs,
            } => json!({"metric": metric, "period": period_secs, "stat": "Average"}),
            ProviderCall::ListDeployments { namespace } => json!({"namespace": namespace}),
            ProviderCall::CostExplorerGetCost { period } => json!({"time_period": period}),
            ProviderCall::ListRecentlyCreated { days } => json!({"created_after_days": days}),
            ProviderCall::TopPods => json!({"all_namespaces": true}),
            ProviderCall::AnalyzeSecurityRules => json!({"check_public_access": true}),
            ProviderCall::ListNodes | ProviderCall::Ec2DescribeSecurityGroups => json!({}),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybookStepDef {
    pub action: &'static str,
    pub call: ProviderCall,
    pub risk_level: RiskLevel,
    pub estimated_cost_usd: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Playbook {
    pub id: &'static str,
    /// Resource types that select this playbook.
    pub resource_types: &'static [&'static str],
    /// Substring the classification metric must contain, if any.
    pub metric: Option<&'static str>,
    /// Incident class that selects this playbook regardless of resource type.
    pub incident_class: Option<IncidentClass>,
    pub summary: &'static str,
    pub steps: Vec<PlaybookStepDef>,
}

impl Playbook {
    pub fn matches(&self, classification: &Classification) -> bool {
        let by_class = self
            .incident_class
            .is_some_and(|class| class == classification.primary_class);
        let by_resource = classification
            .resource_type
            .as_deref()
            .is_some_and(|rt| self.resource_types.contains(&rt));
        if !by_class && !by_resource {
            return false;
        }
        match self.metric {
            Some(wanted) => classification
                .metric
                .as_deref()
                .is_some_and(|metric| metric.contains(wanted)),
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybookStep {
    pub step_id: usize,
    pub action: String,
    pub provider: &'static str,
    pub call: ProviderCall,
    pub risk_level: RiskLevel,
    pub estimated_cost_usd: f64,
    pub requires_approval: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybookPlan {
    pub plan_id: String,
    pub playbook_id: &'static str,
    pub scope: String,
    pub steps: Vec<PlaybookStep>,
    pub estimated_duration_secs: u64,
    pub summary: &'static str,
}

impl PlaybookPlan {
    pub fn needs_approval(&self) -> bool {
        self.steps.iter().any(|step| step.requires_approval)
    }

    pub fn estimated_cost_usd(&self) -> f64 {
        self.steps.iter().map(|step| step.estimated_cost_usd).sum()
    }
}

#[derive(Debug, Clone)]
pub struct PlaybookCatalog {
    playbooks: Vec<Playbook>,
}

impl PlaybookCatalog {
    pub fn new(playbooks: Vec<Playbook>) -> Self {
        Self { playbooks }
    }

    pub fn playbooks(&self) -> &[Playbook] {
        &self.playbooks
    }

    /// First playbook whose triggers match.
    pub fn find(&self, classification: &Classification) -> Option<&Playbook> {
        self.playbooks.iter().find(|pb| pb.matches(classification))
    }

    pub fn build_plan(
        &self,
        classification: &Classification,
        gate: &PolicyGate,
    ) -> Result<PlaybookPlan, PlaybookError> {
        let playbook = self
            .find(classification)
            .ok_or_else(|| PlaybookError::NoMatch {
                resource_type: classification
                    .resource_type
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
                metric: classification.metric.clone(),
            })?;

        let steps: Vec<PlaybookStep> = playbook
            .steps
            .iter()
            .enumerate()
            .map(|(idx, def)| PlaybookStep {
                step_id: idx + 1,
                action: def.action.to_string(),
                provider: def.call.provider(),
                call: def.call.clone(),
                risk_level: def.risk_level,
                estimated_cost_usd: def.estimated_cost_usd,
                requires_approval: gate.requires_approval(def.risk_level, &classification.scope),
            })
            .collect();

        Ok(PlaybookPlan {
            plan_id: Uuid::new_v4().to_string(),
            playbook_id: playbook.id,
            scope: classification.scope.clone(),
            estimated_duration_secs: steps.len() as u64 * SECONDS_PER_PLAYBOOK_STEP,
            steps,
            summary: playbook.summary,
        })
    }
}

impl Default for PlaybookCatalog {
    fn default() -> Self {
        Self::new(vec![
            Playbook {
                id: "investigate_k8s_high_cpu",
                resource_types: &["kubernetes_cluster", "kubernetes", "k8s", "eks", "cluster"],
                metric: Some("cpu"),
                incident_class: None,
                summary: "List all nodes, fetch CPU metrics, identify top consumers, \
                          and check recent deployments.",
                steps: vec![
                    PlaybookStepDef {
                        action: "List all nodes in cluster",
                        call: ProviderCall::ListNodes,
                        risk_level: RiskLevel::Read,
                        estimated_cost_usd: 0.0,
                    },
                    PlaybookStepDef {
                        action: "Fetch CPU metrics (last 1h)",
                        call: ProviderCall::CloudwatchGetMetrics {
                            metric: "cpu".to_string(),
                            period_secs: 3600,
                        },
                        risk_level: RiskLevel::Read,
                        estimated_cost_usd: 0.001,
                    },
                    PlaybookStepDef {
                        action: "List top CPU-consuming pods",
                        call: ProviderCall::TopPods,
                        risk_level: RiskLevel::Read,
                        estimated_cost_usd: 0.0,
                    },
                    PlaybookStepDef {
                        action: "Check recent deployments",
                        call: ProviderCall::ListDeployments { namespace: None },
                        risk_level: RiskLevel::Read,
                        estimated_cost_usd: 0.0,
                    },
                ],
            },
            Playbook {
                id: "investigate_cost_spike",
                resource_types: &["cost", "billing"],
                metric: None,
                incident_class: Some(IncidentClass::CostAnomaly),
                summary: "Analyze cost trends, compare with the previous period, and \
                          identify new resources contributing to the spike.",
                steps: vec![
                    PlaybookStepDef {
                        action: "Get cost breakdown by service (last 30 days)",
                        call: ProviderCall::CostExplorerGetCost {
                            period: CostPeriod::Last30Days,
                        },
                        risk_level: RiskLevel::Read,
                        estimated_cost_usd: 0.01,
                    },
                    PlaybookStepDef {
                        action: "Compare with previous month",
                        call: ProviderCall::CostExplorerGetCost {
                            period: CostPeriod::Previous30Days,
                        },
                        risk_level: RiskLevel::Read,
                        estimated_cost_usd: 0.01,
                    },
                    PlaybookStepDef {
                        action: "List new resources created this month",
                        call: ProviderCall::ListRecentlyCreated { days: 30 },
                        risk_level: RiskLevel::Read,
                        estimated_cost_usd: 0.0,
                    },
                ],
            },
            Playbook {
                id: "list_risky_security_groups",
                resource_types: &["security_group", "security_groups"],
                metric: None,
                incident_class: None,
                summary: "List all security groups and flag rules open to 0.0.0.0/0.",
                steps: vec![
                    PlaybookStepDef {
                        action: "List all security groups",
                        call: ProviderCall::Ec2DescribeSecurityGroups,
                        risk_level: RiskLevel::Read,
                        estimated_cost_usd: 0.0,
                    },
                    PlaybookStepDef {
                        action: "Analyze rules for overly permissive access",
                        call: ProviderCall::AnalyzeSecurityRules,
                        risk_level: RiskLevel::Read,
                        estimated_cost_usd: 0.0,
                    },
                ],
            },
        ])
    }
}
