//! Sequential diagnostic executor.
//!
//! Runs a plan's primitives strictly in order. Each primitive runs on a
//! worker thread so a slow or panicking primitive becomes a failed result
//! instead of stalling or aborting the plan. Facts from successful primitives
//! are recorded in the plan's shared context before the next one starts.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::core::budget::{bounded_timeout, elapsed_ms};
use crate::core::context::SharedContext;
use crate::core::invariants::validate_execution;
use crate::core::types::{ExecutionResult, Facts, Plan, PlanStep, PrimitiveResult};
use crate::error::PolicyViolation;
use crate::primitives::{Primitive, PrimitiveRegistry};

pub const DEFAULT_PRIMITIVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Cloneable stop flag, checked before each primitive starts.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    pub primitive_timeout: Duration,
    /// Caller approved every step that requires approval.
    pub approved: bool,
    pub cancel: Cancellation,
    /// Outer deadline for the whole plan.
    pub deadline: Option<Instant>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            primitive_timeout: DEFAULT_PRIMITIVE_TIMEOUT,
            approved: false,
            cancel: Cancellation::new(),
            deadline: None,
        }
    }
}

/// First step that requires approval when none was given.
pub fn preflight(plan: &Plan, approved: bool) -> Result<(), PolicyViolation> {
    if approved {
        return Ok(());
    }
    match plan.steps.iter().find(|step| step.requires_approval) {
        Some(step) => Err(PolicyViolation {
            step: step.primitive.as_str().to_string(),
            risk: step.risk_level,
            scope: plan.shared_context.scope.clone(),
        }),
        None => Ok(()),
    }
}

pub struct DiagnosticExecutor {
    registry: Arc<PrimitiveRegistry>,
}

impl DiagnosticExecutor {
    pub fn new(registry: Arc<PrimitiveRegistry>) -> Self {
        Self { registry }
    }

    /// Run every step of `plan` in order.
    ///
    /// Refuses to start when a step needs approval that was not given.
    /// Otherwise always returns a result: unresolved, failing, timed-out and
    /// panicking primitives are recorded as failed and execution moves on.
    /// On cancellation the result holds only the attempted steps.
    #[instrument(skip_all, fields(plan_id = %plan.plan_id, steps = plan.steps.len()))]
    pub fn execute(
        &self,
        plan: &mut Plan,
        options: &ExecutionOptions,
    ) -> Result<ExecutionResult, PolicyViolation> {
        preflight(plan, options.approved)?;

        let start_time = Utc::now();
        let mut results = Vec::with_capacity(plan.steps.len());
        let mut cancelled = false;
        for step in &plan.steps {
            if options.cancel.is_cancelled() {
                info!(remaining = plan.steps.len() - results.len(), "execution cancelled");
                cancelled = true;
                break;
            }
            let result = self.run_step(step, &mut plan.shared_context, options);
            results.push(result);
        }

        let result = ExecutionResult::from_results(
            plan.plan_id.clone(),
            start_time,
            Utc::now(),
            results,
            cancelled,
        );
        let violations = validate_execution(&result);
        debug_assert!(violations.is_empty(), "execution invariants: {violations:?}");
        info!(
            status = %result.status,
            succeeded = result.counts.succeeded,
            failed = result.counts.failed,
            "execution finished"
        );
        Ok(result)
    }

    fn run_step(
        &self,
        step: &PlanStep,
        context: &mut SharedContext,
        options: &ExecutionOptions,
    ) -> PrimitiveResult {
        let name = step.primitive.as_str();
        let primitive = match self.registry.get(step.primitive) {
            Ok(primitive) => primitive,
            Err(err) => {
                warn!(primitive = name, error = %err, "primitive unresolved");
                return PrimitiveResult::failed(name, context, err.to_string(), 0);
            }
        };
        let timeout = match bounded_timeout(options.primitive_timeout, options.deadline) {
            Ok(timeout) => timeout,
            Err(err) => {
                warn!(primitive = name, "run deadline exceeded");
                return PrimitiveResult::failed(name, context, format!("run {err}"), 0);
            }
        };

        let started = Instant::now();
        let outcome = run_isolated(primitive, context.clone(), timeout);
        let duration_ms = elapsed_ms(started);
        match outcome {
            Ok(facts) => {
                debug!(primitive = name, duration_ms, "primitive succeeded");
                context.record(step.primitive, facts.clone());
                PrimitiveResult::succeeded(name, context, facts, duration_ms)
            }
            Err(error) => {
                warn!(primitive = name, duration_ms, error = %error, "primitive failed");
                PrimitiveResult::failed(name, context, error, duration_ms)
            }
        }
    }
}

/// Run one primitive on its own thread and wait at most `timeout`.
///
/// A worker that outlives its timeout is abandoned, not joined.
fn run_isolated(
    primitive: Arc<dyn Primitive>,
    context: SharedContext,
    timeout: Duration,
) -> std::result::Result<Facts, String> {
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name(format!("primitive-{}", primitive.kind()))
        .spawn(move || {
            let outcome = primitive.execute(&context);
            let _ = tx.send(outcome);
        });
    if let Err(err) = spawned {
        return Err(format!("spawn primitive worker: {err}"));
    }
    match rx.recv_timeout(timeout) {
        Ok(Ok(facts)) => Ok(facts),
        Ok(Err(err)) => Err(format!("{err:#}")),
        Err(RecvTimeoutError::Timeout) => Err(format!("timed out after {}ms", timeout.as_millis())),
        Err(RecvTimeoutError::Disconnected) => Err("primitive panicked".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::composer::PlanComposer;
    use crate::core::policy::PolicyGate;
    use crate::core::strategy::StrategyTable;
    use crate::core::types::{IncidentClass, PrimitiveKind, RiskLevel, RunStatus};
    use crate::primitives::RegistryBuilder;
    use crate::test_support::{
        CancellingPrimitive, ContextProbe, FailingPrimitive, PanickingPrimitive, SlowPrimitive,
        StaticPrimitive, classification,
    };
    use serde_json::json;

    use PrimitiveKind as P;

    const FOUR: [PrimitiveKind; 4] = [
        P::AnalyzeUtilization,
        P::CompareBaseline,
        P::FindTopConsumers,
        P::CheckRecentChanges,
    ];

    fn table(kinds: &[PrimitiveKind]) -> StrategyTable {
        StrategyTable::empty().with_strategy(IncidentClass::ResourceSaturation, "test", kinds)
    }

    fn plan_for(kinds: &[PrimitiveKind]) -> Plan {
        PlanComposer::new(table(kinds), PolicyGate::default())
            .compose(&classification(IncidentClass::ResourceSaturation))
            .expect("plan")
    }

    fn executor(primitives: Vec<Arc<dyn Primitive>>, kinds: &[PrimitiveKind]) -> DiagnosticExecutor {
        let builder = primitives
            .into_iter()
            .fold(RegistryBuilder::new(), |builder, p| builder.register(p));
        DiagnosticExecutor::new(Arc::new(builder.build_for(&table(kinds)).expect("registry")))
    }

    fn ok(kind: PrimitiveKind) -> Arc<dyn Primitive> {
        Arc::new(StaticPrimitive::new(kind, json!({"value": kind.as_str()})))
    }

    #[test]
    fn failure_in_the_middle_does_not_abort() {
        let executor = executor(
            vec![
                ok(P::AnalyzeUtilization),
                Arc::new(FailingPrimitive::new(P::CompareBaseline, "cloudwatch throttled")),
                ok(P::FindTopConsumers),
                ok(P::CheckRecentChanges),
            ],
            &FOUR,
        );
        let mut plan = plan_for(&FOUR);
        let result = executor
            .execute(&mut plan, &ExecutionOptions::default())
            .expect("execute");
        assert_eq!(result.counts.executed, 4);
        assert_eq!(result.counts.succeeded, 3);
        assert_eq!(result.counts.failed, 1);
        assert_eq!(result.status, RunStatus::Partial);
        assert_eq!(result.results[1].error.as_deref(), Some("cloudwatch throttled"));
        assert!(result.results[1].facts.is_empty());
        assert!(validate_execution(&result).is_empty());
    }

    #[test]
    fn all_success_is_completed_and_all_failure_is_failed() {
        let kinds = [P::AnalyzeUtilization, P::CompareBaseline];
        let executor_ok = executor(kinds.iter().map(|k| ok(*k)).collect(), &kinds);
        let result = executor_ok
            .execute(&mut plan_for(&kinds), &ExecutionOptions::default())
            .expect("execute");
        assert_eq!(result.status, RunStatus::Completed);

        let executor_bad = executor(
            kinds
                .iter()
                .map(|k| Arc::new(FailingPrimitive::new(*k, "down")) as Arc<dyn Primitive>)
                .collect(),
            &kinds,
        );
        let result = executor_bad
            .execute(&mut plan_for(&kinds), &ExecutionOptions::default())
            .expect("execute");
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.counts.executed, 2);
    }

    #[test]
    fn later_primitives_see_earlier_facts() {
        let kinds = [P::AnalyzeUtilization, P::FindTopConsumers];
        let executor = executor(
            vec![ok(P::AnalyzeUtilization), Arc::new(ContextProbe::new(P::FindTopConsumers))],
            &kinds,
        );
        let mut plan = plan_for(&kinds);
        let result = executor
            .execute(&mut plan, &ExecutionOptions::default())
            .expect("execute");
        let probe = &result.results[1].facts;
        assert_eq!(probe["enrichment_keys"], json!(["analyze_utilization_result"]));
        assert_eq!(
            probe["visible"][0]["facts"]["value"],
            json!("analyze_utilization")
        );
        assert_eq!(
            plan.shared_context.enrichment_keys(),
            vec!["analyze_utilization_result", "find_top_consumers_result"]
        );
    }

    #[test]
    fn failed_primitives_do_not_enrich_context() {
        let kinds = [P::AnalyzeUtilization, P::FindTopConsumers];
        let executor = executor(
            vec![
                Arc::new(FailingPrimitive::new(P::AnalyzeUtilization, "down")),
                Arc::new(ContextProbe::new(P::FindTopConsumers)),
            ],
            &kinds,
        );
        let result = executor
            .execute(&mut plan_for(&kinds), &ExecutionOptions::default())
            .expect("execute");
        assert_eq!(result.results[1].facts["enrichment_keys"], json!([]));
    }

    #[test]
    fn panics_and_timeouts_become_failures() {
        let kinds = [P::AnalyzeUtilization, P::CompareBaseline, P::FindTopConsumers];
        let executor = executor(
            vec![
                Arc::new(PanickingPrimitive::new(P::AnalyzeUtilization)),
                Arc::new(SlowPrimitive::new(P::CompareBaseline, Duration::from_secs(5))),
                ok(P::FindTopConsumers),
            ],
            &kinds,
        );
        let options = ExecutionOptions {
            primitive_timeout: Duration::from_millis(100),
            ..ExecutionOptions::default()
        };
        let result = executor
            .execute(&mut plan_for(&kinds), &options)
            .expect("execute");
        assert_eq!(result.results[0].error.as_deref(), Some("primitive panicked"));
        assert_eq!(result.results[1].error.as_deref(), Some("timed out after 100ms"));
        assert!(result.results[2].success);
        assert_eq!(result.status, RunStatus::Partial);
    }

    #[test]
    fn unresolved_primitive_is_recorded_as_failed() {
        let kinds = [P::AnalyzeUtilization, P::CompareBaseline];
        let registry = RegistryBuilder::new()
            .register(ok(P::AnalyzeUtilization))
            .build_for(&StrategyTable::empty())
            .expect("registry");
        let executor = DiagnosticExecutor::new(Arc::new(registry));
        let result = executor
            .execute(&mut plan_for(&kinds), &ExecutionOptions::default())
            .expect("execute");
        assert_eq!(result.counts.executed, 2);
        assert_eq!(
            result.results[1].error.as_deref(),
            Some("primitive compare_baseline is not registered")
        );
    }

    #[test]
    fn cancellation_stops_before_next_primitive() {
        let cancel = Cancellation::new();
        let executor = executor(
            vec![
                ok(P::AnalyzeUtilization),
                Arc::new(CancellingPrimitive::new(P::CompareBaseline, cancel.clone())),
                ok(P::FindTopConsumers),
                ok(P::CheckRecentChanges),
            ],
            &FOUR,
        );
        let options = ExecutionOptions {
            cancel,
            ..ExecutionOptions::default()
        };
        let result = executor
            .execute(&mut plan_for(&FOUR), &options)
            .expect("execute");
        assert!(result.cancelled);
        assert_eq!(result.counts.executed, 2);
        assert_eq!(result.status, RunStatus::Completed);
        assert!(validate_execution(&result).is_empty());
    }

    #[test]
    fn expired_deadline_fails_remaining_steps() {
        let kinds = [P::AnalyzeUtilization, P::CompareBaseline];
        let executor = executor(kinds.iter().map(|k| ok(*k)).collect(), &kinds);
        let options = ExecutionOptions {
            deadline: Some(Instant::now()),
            ..ExecutionOptions::default()
        };
        thread::sleep(Duration::from_millis(2));
        let result = executor
            .execute(&mut plan_for(&kinds), &options)
            .expect("execute");
        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.results[0].error.as_deref(), Some("run deadline exceeded"));
    }

    #[test]
    fn unapproved_step_refuses_to_run() {
        let kinds = [P::AnalyzeUtilization];
        let executor = executor(vec![ok(P::AnalyzeUtilization)], &kinds);
        let gate = PolicyGate::new([RiskLevel::Read], Vec::new());
        let mut plan = PlanComposer::new(table(&kinds), gate)
            .compose(&classification(IncidentClass::ResourceSaturation))
            .expect("plan");

        let err = executor
            .execute(&mut plan, &ExecutionOptions::default())
            .unwrap_err();
        assert_eq!(err.step, "analyze_utilization");
        assert_eq!(err.risk, RiskLevel::Read);
        assert!(plan.shared_context.enrichment_keys().is_empty());

        let approved = ExecutionOptions {
            approved: true,
            ..ExecutionOptions::default()
        };
        let result = executor.execute(&mut plan, &approved).expect("approved run");
        assert_eq!(result.status, RunStatus::Completed);
    }
}
