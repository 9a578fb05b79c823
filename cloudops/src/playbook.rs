//! Legacy playbook execution.
//!
//! Runs a [`PlaybookPlan`] step by step against the collaborators. Unlike the
//! diagnostic executor, a failed step ends the run: later steps in a static
//! playbook assume the earlier ones produced data.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use crate::core::budget::elapsed_ms;
use crate::core::context::SharedContext;
use crate::core::playbook::{CostPeriod, PlaybookPlan, PlaybookStep, ProviderCall};
use crate::core::types::{Classification, RunStatus};
use crate::error::PolicyViolation;
use crate::executor::Cancellation;
use crate::io::cloud::{CloudApi, MetricQuery, ResourceTarget, RuleDirection, RuleSource, TimeWindow};
use crate::io::orchestrator::{NamespaceSelector, OrchestratorApi};

const TOP_PODS: usize = 10;
const COST_PERIOD_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybookStepOutcome {
    pub step_id: usize,
    pub action: String,
    pub provider: &'static str,
    pub method: &'static str,
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybookExecution {
    pub plan_id: String,
    pub results: Vec<PlaybookStepOutcome>,
    pub status: RunStatus,
    /// Step that ended the run early, if any.
    pub stopped_at: Option<usize>,
    pub cancelled: bool,
}

impl PlaybookExecution {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }
}

pub struct PlaybookRunner {
    cloud: Arc<dyn CloudApi>,
    orchestrator: Arc<dyn OrchestratorApi>,
}

impl PlaybookRunner {
    pub fn new(cloud: Arc<dyn CloudApi>, orchestrator: Arc<dyn OrchestratorApi>) -> Self {
        Self {
            cloud,
            orchestrator,
        }
    }

    /// Execute `plan` in order, stopping at the first failed step.
    #[instrument(skip_all, fields(plan_id = %plan.plan_id, playbook = plan.playbook_id))]
    pub fn execute(
        &self,
        plan: &PlaybookPlan,
        classification: &Classification,
        approved: bool,
        cancel: &Cancellation,
    ) -> Result<PlaybookExecution, PolicyViolation> {
        if let Some(step) = plan.steps.iter().find(|step| step.requires_approval && !approved) {
            return Err(PolicyViolation {
                step: step.action.clone(),
                risk: step.risk_level,
                scope: plan.scope.clone(),
            });
        }

        let target = ResourceTarget::from_context(&SharedContext::from_classification(classification));
        let mut results = Vec::with_capacity(plan.steps.len());
        let mut stopped_at = None;
        let mut cancelled = false;
        for step in &plan.steps {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            let outcome = self.run_step(step, &target);
            let failed = !outcome.success;
            results.push(outcome);
            if failed {
                warn!(step = step.step_id, "playbook step failed; stopping");
                stopped_at = Some(step.step_id);
                break;
            }
        }

        let succeeded = results.iter().filter(|r| r.success).count();
        let status = RunStatus::from_counts(succeeded, results.len() - succeeded);
        info!(%status, steps = results.len(), "playbook finished");
        Ok(PlaybookExecution {
            plan_id: plan.plan_id.clone(),
            results,
            status,
            stopped_at,
            cancelled,
        })
    }

    fn run_step(&self, step: &PlaybookStep, target: &ResourceTarget) -> PlaybookStepOutcome {
        let started = Instant::now();
        let outcome = self.dispatch(&step.call, target);
        let duration_ms = elapsed_ms(started);
        let (success, output, error) = match outcome {
            Ok(value) => (true, Some(value), None),
            Err(err) => (false, None, Some(format!("{err:#}"))),
        };
        PlaybookStepOutcome {
            step_id: step.step_id,
            action: step.action.clone(),
            provider: step.provider,
            method: step.call.method(),
            success,
            output,
            error,
            duration_ms,
        }
    }

    fn dispatch(&self, call: &ProviderCall, target: &ResourceTarget) -> Result<Value> {
        let value = match call {
            ProviderCall::ListNodes => serde_json::to_value(self.orchestrator.list_nodes()?)?,
            ProviderCall::CloudwatchGetMetrics {
                metric,
                period_secs,
            } => {
                let query =
                    MetricQuery::for_resource(target, metric, TimeWindow::ending_now(*period_secs));
                let series = self.cloud.fetch_metric_series(&query)?;
                json!({
                    "namespace": query.namespace,
                    "metric": query.metric_name,
                    "average": series.mean(),
                    "maximum": series.max(),
                    "datapoints": series.datapoints,
                })
            }
            ProviderCall::TopPods => {
                let mut workloads = self.orchestrator.list_workloads(&NamespaceSelector::All)?;
                workloads.sort_by(|a, b| b.cpu_request_cores.total_cmp(&a.cpu_request_cores));
                workloads.truncate(TOP_PODS);
                serde_json::to_value(workloads)?
            }
            ProviderCall::ListDeployments { namespace } => {
                let selector = match namespace {
                    Some(ns) => NamespaceSelector::Named(ns.clone()),
                    None => NamespaceSelector::All,
                };
                serde_json::to_value(self.orchestrator.list_deployments(&selector)?)?
            }
            ProviderCall::CostExplorerGetCost { period } => {
                let window = cost_window(*period);
                serde_json::to_value(self.cloud.fetch_cost_breakdown(&window)?)?
            }
            ProviderCall::ListRecentlyCreated { days } => {
                let window = TimeWindow::last_hours(days.saturating_mul(24));
                let events = self.cloud.lookup_change_events(target, &window)?;
                let created: Vec<_> = events
                    .into_iter()
                    .filter(|e| e.event_name.starts_with("Create") || e.event_name.starts_with("Run"))
                    .collect();
                serde_json::to_value(created)?
            }
            ProviderCall::Ec2DescribeSecurityGroups => {
                let rules = self.cloud.list_security_rules()?;
                let groups: Vec<_> = rules
                    .into_iter()
                    .filter(|r| r.source == RuleSource::SecurityGroup)
                    .collect();
                serde_json::to_value(groups)?
            }
            ProviderCall::AnalyzeSecurityRules => {
                let rules = self.cloud.list_security_rules()?;
                let risky: Vec<_> = rules
                    .iter()
                    .filter(|r| {
                        r.source == RuleSource::SecurityGroup
                            && r.direction == RuleDirection::Ingress
                            && r.is_world_open()
                    })
                    .map(|r| {
                        json!({
                            "group_id": r.group_id,
                            "group_name": r.group_name,
                            "port": r.port_label(),
                            "cidr": r.cidr,
                        })
                    })
                    .collect();
                json!({"risky_rule_count": risky.len(), "risky_rules": risky})
            }
        };
        Ok(value)
    }
}

fn cost_window(period: CostPeriod) -> TimeWindow {
    let current = TimeWindow::ending_at(Utc::now(), COST_PERIOD_DAYS as u64 * 86_400);
    match period {
        CostPeriod::Last30Days => current,
        CostPeriod::Previous30Days => current.shifted_back(Duration::days(COST_PERIOD_DAYS)),
    }
}
