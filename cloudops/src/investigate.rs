//! End-to-end investigation pipeline.
//!
//! classify → threshold → compose → execute → interpret → audit. The legacy
//! playbook path shares classification and the audit step but replaces the
//! strategy table with the static playbook catalog.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::agents::classifier::IncidentClassifier;
use crate::agents::interpreter::{
    GroundingGap, Interpreter, InterpreterSettings, collect_facts, grounding_gaps,
};
use crate::core::budget::elapsed_ms;
use crate::core::composer::PlanComposer;
use crate::core::playbook::{PlaybookCatalog, PlaybookPlan};
use crate::core::policy::PolicyGate;
use crate::core::strategy::StrategyTable;
use crate::core::types::{Classification, ExecutionResult, Interpretation, Plan, RunStatus};
use crate::error::InvestigationError;
use crate::executor::{Cancellation, DiagnosticExecutor, ExecutionOptions};
use crate::io::audit::{AuditMode, AuditRecord, AuditSink};
use crate::io::aws::AwsCliCloud;
use crate::io::cloud::CloudApi;
use crate::io::config::CloudopsConfig;
use crate::io::fixtures::{FixtureCloud, FixtureOrchestrator};
use crate::io::generator::{CommandGenerator, TextGenerator};
use crate::io::orchestrator::{KubectlOrchestrator, OrchestratorApi};
use crate::playbook::{PlaybookExecution, PlaybookRunner};
use crate::primitives::{RegistryBuilder, standard_registry};

/// The external services one investigator talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub generator: Arc<dyn TextGenerator>,
    pub cloud: Arc<dyn CloudApi>,
    pub orchestrator: Arc<dyn OrchestratorApi>,
}

impl Collaborators {
    /// Command-backed generator plus fixture or CLI-backed infrastructure
    /// clients, depending on `cloud.use_real_apis`.
    pub fn from_config(cfg: &CloudopsConfig) -> Self {
        let generator: Arc<dyn TextGenerator> = Arc::new(CommandGenerator::new(
            cfg.llm.command.clone(),
            cfg.llm.model.clone(),
            cfg.llm.output_limit_bytes,
        ));
        if !cfg.cloud.use_real_apis {
            return Self {
                generator,
                cloud: Arc::new(FixtureCloud),
                orchestrator: Arc::new(FixtureOrchestrator),
            };
        }
        let timeout = cfg.executor.primitive_timeout();
        let limit = cfg.collaborator_output_limit();
        Self {
            generator,
            cloud: Arc::new(
                AwsCliCloud::new(cfg.cloud.aws_command.clone(), timeout, limit)
                    .with_region(cfg.cloud.region.clone())
                    .with_profile(cfg.cloud.profile.clone()),
            ),
            orchestrator: Arc::new(KubectlOrchestrator::new(
                cfg.orchestrator.kubectl_command.clone(),
                cfg.orchestrator.context.clone(),
                timeout,
                limit,
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub confidence_threshold: f64,
    pub default_scope: String,
    pub gate: PolicyGate,
    pub llm_timeout: Duration,
    pub interpreter: InterpreterSettings,
    pub primitive_timeout: Duration,
    pub run_timeout: Option<Duration>,
}

impl PipelineSettings {
    pub fn from_config(cfg: &CloudopsConfig) -> Result<Self> {
        let llm_timeout = Duration::from_secs(cfg.llm.timeout_secs);
        Ok(Self {
            confidence_threshold: cfg.policy.confidence_threshold,
            default_scope: cfg.policy.default_scope.clone(),
            gate: cfg.policy.gate()?,
            llm_timeout,
            interpreter: InterpreterSettings {
                temperature: cfg.llm.temperature,
                max_tokens: cfg.llm.max_tokens,
                timeout: llm_timeout,
            },
            primitive_timeout: cfg.executor.primitive_timeout(),
            run_timeout: cfg.executor.run_timeout(),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct InvestigationRequest {
    pub query: String,
    pub prior_context: Option<String>,
    /// Overrides the scope named by the classifier.
    pub scope: Option<String>,
    pub dry_run: bool,
    pub approve: bool,
    pub cancel: Cancellation,
}

impl InvestigationRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

/// What happened at the reasoning stage. A failure here leaves the facts
/// usable.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InterpretationOutcome {
    Ready(Interpretation),
    Failed { error: String },
    Skipped { reason: String },
}

impl InterpretationOutcome {
    pub fn interpretation(&self) -> Option<&Interpretation> {
        match self {
            InterpretationOutcome::Ready(interpretation) => Some(interpretation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InvestigationReport {
    pub query: String,
    pub classification: Classification,
    pub plan: Plan,
    /// Absent on dry runs.
    pub execution: Option<ExecutionResult>,
    pub interpretation: InterpretationOutcome,
    /// Hypothesis evidence that cites nothing in the collected facts.
    pub grounding_gaps: Vec<GroundingGap>,
    pub audit_id: Option<String>,
    /// Set when the audit record could not be written. The report is still
    /// complete.
    pub audit_error: Option<String>,
}

impl InvestigationReport {
    pub fn status(&self) -> Option<RunStatus> {
        self.execution.as_ref().map(|execution| execution.status)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaybookReport {
    pub query: String,
    pub classification: Classification,
    pub plan: PlaybookPlan,
    /// Absent on dry runs.
    pub execution: Option<PlaybookExecution>,
    pub audit_id: Option<String>,
    pub audit_error: Option<String>,
}

impl PlaybookReport {
    pub fn status(&self) -> Option<RunStatus> {
        self.execution.as_ref().map(|execution| execution.status)
    }
}

pub struct Investigator {
    classifier: IncidentClassifier,
    composer: PlanComposer,
    executor: DiagnosticExecutor,
    interpreter: Interpreter,
    catalog: PlaybookCatalog,
    playbooks: PlaybookRunner,
    settings: PipelineSettings,
}

impl Investigator {
    /// Standard primitives over `collaborators` with the default strategy
    /// table and playbook catalog.
    pub fn new(
        collaborators: Collaborators,
        settings: PipelineSettings,
    ) -> Result<Self, InvestigationError> {
        let registry = standard_registry(
            collaborators.cloud.clone(),
            collaborators.orchestrator.clone(),
        );
        Self::with_registry(collaborators, registry, StrategyTable::default(), settings)
    }

    /// Fails when a strategy references a primitive `registry` lacks.
    pub fn with_registry(
        collaborators: Collaborators,
        registry: RegistryBuilder,
        strategies: StrategyTable,
        settings: PipelineSettings,
    ) -> Result<Self, InvestigationError> {
        let registry = registry.build_for(&strategies)?;
        let classifier = IncidentClassifier::new(
            collaborators.generator.clone(),
            settings.llm_timeout,
            settings.default_scope.clone(),
        )
        .map_err(|err| InvestigationError::Configuration(format!("{err:#}")))?;
        let interpreter = Interpreter::new(collaborators.generator.clone(), settings.interpreter)
            .map_err(|err| InvestigationError::Configuration(format!("{err:#}")))?;
        Ok(Self {
            classifier,
            composer: PlanComposer::new(strategies, settings.gate.clone()),
            executor: DiagnosticExecutor::new(Arc::new(registry)),
            interpreter,
            catalog: PlaybookCatalog::default(),
            playbooks: PlaybookRunner::new(collaborators.cloud, collaborators.orchestrator),
            settings,
        })
    }

    pub fn from_config(cfg: &CloudopsConfig) -> Result<Self, InvestigationError> {
        let settings = PipelineSettings::from_config(cfg)
            .map_err(|err| InvestigationError::Configuration(format!("{err:#}")))?;
        Self::new(Collaborators::from_config(cfg), settings)
    }

    /// Classify and apply the confidence threshold.
    pub fn classify(
        &self,
        request: &InvestigationRequest,
    ) -> Result<Classification, InvestigationError> {
        let classification = self.classifier.classify(
            &request.query,
            request.prior_context.as_deref(),
            request.scope.as_deref(),
        )?;
        info!(
            class = %classification.primary_class,
            confidence = classification.confidence,
            scope = %classification.scope,
            "classified"
        );
        if classification.confidence < self.settings.confidence_threshold {
            return Err(InvestigationError::LowConfidence {
                confidence: classification.confidence,
                threshold: self.settings.confidence_threshold,
            });
        }
        Ok(classification)
    }

    /// Run the reasoning pipeline. Dry runs stop after composition and write
    /// no audit record; every other terminal run writes exactly one.
    #[instrument(skip_all, fields(dry_run = request.dry_run))]
    pub fn investigate(
        &self,
        request: &InvestigationRequest,
        audit: &dyn AuditSink,
    ) -> Result<InvestigationReport, InvestigationError> {
        let started = Instant::now();
        if request.cancel.is_cancelled() {
            return Err(InvestigationError::Cancelled);
        }
        let classification = self.classify(request)?;
        let mut plan = self.composer.compose(&classification)?;
        info!(plan_id = %plan.plan_id, steps = plan.steps.len(), "plan composed");

        if request.dry_run {
            return Ok(InvestigationReport {
                query: request.query.clone(),
                classification,
                plan,
                execution: None,
                interpretation: InterpretationOutcome::Skipped {
                    reason: "dry run".to_string(),
                },
                grounding_gaps: Vec::new(),
                audit_id: None,
                audit_error: None,
            });
        }
        let options = ExecutionOptions {
            primitive_timeout: self.settings.primitive_timeout,
            approved: request.approve,
            cancel: request.cancel.clone(),
            deadline: self.settings.run_timeout.map(|timeout| Instant::now() + timeout),
        };
        let execution = self.executor.execute(&mut plan, &options)?;

        let (interpretation, gaps) = self.interpret(&execution, &plan);
        let record = AuditRecord::new(
            AuditMode::Investigation,
            &request.query,
            Some(classification.primary_class),
            &plan.plan_id,
            plan.steps.iter().map(|step| step.risk_level).collect(),
            plan.estimated_cost_usd(),
            elapsed_ms(started),
            execution.counts.executed,
            execution.status,
        );
        let (audit_id, audit_error) = append_audit(audit, record);

        Ok(InvestigationReport {
            query: request.query.clone(),
            classification,
            plan,
            execution: Some(execution),
            interpretation,
            grounding_gaps: gaps,
            audit_id,
            audit_error,
        })
    }

    fn interpret(
        &self,
        execution: &ExecutionResult,
        plan: &Plan,
    ) -> (InterpretationOutcome, Vec<GroundingGap>) {
        if execution.cancelled {
            return (
                InterpretationOutcome::Skipped {
                    reason: "investigation cancelled".to_string(),
                },
                Vec::new(),
            );
        }
        if execution.counts.succeeded == 0 {
            return (
                InterpretationOutcome::Skipped {
                    reason: "no primitive produced facts".to_string(),
                },
                Vec::new(),
            );
        }
        match self.interpreter.interpret(execution, plan.incident_class) {
            Ok(interpretation) => {
                let gaps = grounding_gaps(&interpretation, &collect_facts(execution));
                if !gaps.is_empty() {
                    warn!(count = gaps.len(), "hypotheses cite evidence absent from facts");
                }
                (InterpretationOutcome::Ready(interpretation), gaps)
            }
            Err(err) => {
                warn!(error = %err, "interpretation failed; facts remain available");
                (
                    InterpretationOutcome::Failed {
                        error: err.to_string(),
                    },
                    Vec::new(),
                )
            }
        }
    }

    /// Static playbook path. Execution stops at the first failed step.
    #[instrument(skip_all, fields(dry_run = request.dry_run))]
    pub fn investigate_playbook(
        &self,
        request: &InvestigationRequest,
        audit: &dyn AuditSink,
    ) -> Result<PlaybookReport, InvestigationError> {
        let started = Instant::now();
        if request.cancel.is_cancelled() {
            return Err(InvestigationError::Cancelled);
        }
        let classification = self.classify(request)?;
        let plan = self
            .catalog
            .build_plan(&classification, self.composer.gate())?;
        info!(plan_id = %plan.plan_id, playbook = plan.playbook_id, "playbook selected");

        if request.dry_run {
            return Ok(PlaybookReport {
                query: request.query.clone(),
                classification,
                plan,
                execution: None,
                audit_id: None,
                audit_error: None,
            });
        }
        let execution =
            self.playbooks
                .execute(&plan, &classification, request.approve, &request.cancel)?;
        let record = AuditRecord::new(
            AuditMode::Playbook,
            &request.query,
            Some(classification.primary_class),
            &plan.plan_id,
            plan.steps.iter().map(|step| step.risk_level).collect(),
            plan.estimated_cost_usd(),
            elapsed_ms(started),
            execution.results.len(),
            execution.status,
        );
        let (audit_id, audit_error) = append_audit(audit, record);

        Ok(PlaybookReport {
            query: request.query.clone(),
            classification,
            plan,
            execution: Some(execution),
            audit_id,
            audit_error,
        })
    }
}

/// Append `record`, keeping the failure as text so the finished report is
/// never dropped.
fn append_audit(audit: &dyn AuditSink, record: AuditRecord) -> (Option<String>, Option<String>) {
    match audit.append(&record) {
        Ok(()) => (Some(record.audit_id), None),
        Err(err) => {
            let message = format!("{err:#}");
            warn!(audit_id = %record.audit_id, error = %message, "audit write failed");
            (None, Some(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{IncidentClass, PrimitiveKind, RiskLevel};
    use crate::primitives::Primitive;
    use crate::test_support::{
        FailingAuditSink, FailingPrimitive, MemoryAuditSink, ScriptedGenerator, StaticPrimitive,
    };
    use crate::io::generator::GenerationRequest;
    use serde_json::json;

    use PrimitiveKind as P;

    const CLASSIFIED: &str = r#"{"primary_class": "resource_saturation", "secondary_classes": [],
        "confidence": 0.92, "resource_type": "eks", "resource_id": "prod-cluster",
        "metric": "cpu", "scope": "prod", "time_window": 3600}"#;
    const VAGUE: &str = r#"{"primary_class": "resource_saturation", "secondary_classes": [],
        "confidence": 0.4, "resource_type": null, "resource_id": null,
        "metric": null, "scope": "prod", "time_window": 3600}"#;
    const INTERPRETED: &str = r#"{"key_findings": ["cpu average is 88"],
        "likely_root_causes": [{"cause": "traffic surge", "confidence": 0.7,
            "evidence": ["analyze_utilization avg 88"]}],
        "recommended_actions": [{"action": "scale out", "priority": 1, "command": null}],
        "confidence": 0.75, "requires_human_review": true}"#;

    const KINDS: [PrimitiveKind; 2] = [P::AnalyzeUtilization, P::CheckRecentChanges];

    fn settings() -> PipelineSettings {
        PipelineSettings::from_config(&CloudopsConfig::default()).expect("settings")
    }

    fn investigator(generator: ScriptedGenerator, failing: bool) -> Investigator {
        investigator_with(Arc::new(generator), failing)
    }

    fn investigator_with(generator: Arc<dyn TextGenerator>, failing: bool) -> Investigator {
        let changes: Arc<dyn Primitive> = if failing {
            Arc::new(FailingPrimitive::new(P::CheckRecentChanges, "cloudtrail down"))
        } else {
            Arc::new(StaticPrimitive::new(P::CheckRecentChanges, json!({"total": 1})))
        };
        let registry = RegistryBuilder::new()
            .register(Arc::new(StaticPrimitive::new(P::AnalyzeUtilization, json!({"avg": 88}))))
            .register(changes);
        let strategies = StrategyTable::empty().with_strategy(
            IncidentClass::ResourceSaturation,
            "saturation",
            &KINDS,
        );
        let collaborators = Collaborators {
            generator,
            cloud: Arc::new(FixtureCloud),
            orchestrator: Arc::new(FixtureOrchestrator),
        };
        Investigator::with_registry(collaborators, registry, strategies, settings())
            .expect("investigator")
    }

    #[test]
    fn full_run_is_interpreted_and_audited_once() {
        let sink = MemoryAuditSink::default();
        let report = investigator(ScriptedGenerator::new([CLASSIFIED, INTERPRETED]), false)
            .investigate(&InvestigationRequest::new("high cpu on prod cluster"), &sink)
            .expect("report");
        assert_eq!(report.status(), Some(RunStatus::Completed));
        assert!(report.interpretation.interpretation().is_some());
        assert!(report.grounding_gaps.is_empty());

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].mode, AuditMode::Investigation);
        assert_eq!(records[0].plan_id, report.plan.plan_id);
        assert_eq!(records[0].step_risks, vec![RiskLevel::Read, RiskLevel::Read]);
        assert_eq!(records[0].steps_executed, 2);
        assert_eq!(report.audit_id.as_deref(), Some(records[0].audit_id.as_str()));
    }

    #[test]
    fn dry_run_writes_no_audit_record() {
        let sink = MemoryAuditSink::default();
        let request = InvestigationRequest {
            dry_run: true,
            ..InvestigationRequest::new("high cpu")
        };
        let report = investigator(ScriptedGenerator::new([CLASSIFIED]), false)
            .investigate(&request, &sink)
            .expect("report");
        assert!(report.execution.is_none());
        assert_eq!(report.plan.primitive_names(), vec!["analyze_utilization", "check_recent_changes"]);
        assert!(sink.records().is_empty());
    }

    #[test]
    fn low_confidence_is_rejected_before_planning() {
        let sink = MemoryAuditSink::default();
        let err = investigator(ScriptedGenerator::new([VAGUE]), false)
            .investigate(&InvestigationRequest::new("something is off"), &sink)
            .unwrap_err();
        assert!(matches!(err, InvestigationError::LowConfidence { .. }));
        assert!(sink.records().is_empty());
    }

    #[test]
    fn interpretation_failure_keeps_facts_and_audits() {
        let sink = MemoryAuditSink::default();
        let report = investigator(ScriptedGenerator::new([CLASSIFIED, "not json"]), true)
            .investigate(&InvestigationRequest::new("high cpu"), &sink)
            .expect("report");
        assert_eq!(report.status(), Some(RunStatus::Partial));
        assert!(matches!(report.interpretation, InterpretationOutcome::Failed { .. }));
        let execution = report.execution.expect("execution");
        assert_eq!(execution.results[0].facts["avg"], json!(88));
        assert_eq!(sink.records()[0].status, RunStatus::Partial);
    }

    #[test]
    fn audit_failure_is_reported_with_the_facts() {
        let report = investigator(ScriptedGenerator::new([CLASSIFIED, INTERPRETED]), false)
            .investigate(&InvestigationRequest::new("high cpu"), &FailingAuditSink)
            .expect("report");
        assert!(report.audit_id.is_none());
        assert!(report.audit_error.as_deref().is_some_and(|e| e.contains("disk full")));
        let execution = report.execution.expect("execution");
        assert_eq!(execution.status, RunStatus::Completed);
        assert_eq!(execution.results[0].facts["avg"], json!(88));
        assert!(report.interpretation.interpretation().is_some());
    }

    #[test]
    fn playbook_audit_failure_keeps_the_execution() {
        let report = investigator(ScriptedGenerator::new([CLASSIFIED]), false)
            .investigate_playbook(&InvestigationRequest::new("high cpu on eks"), &FailingAuditSink)
            .expect("report");
        assert!(report.audit_error.is_some());
        assert_eq!(report.status(), Some(RunStatus::Completed));
    }

    /// Cancels the request while answering the classification call.
    struct CancelOnClassify {
        cancel: Cancellation,
    }

    impl TextGenerator for CancelOnClassify {
        fn generate(&self, _request: &GenerationRequest) -> Result<String> {
            self.cancel.cancel();
            Ok(CLASSIFIED.to_string())
        }
    }

    #[test]
    fn cancel_after_classification_yields_cancelled_execution() {
        let request = InvestigationRequest::new("high cpu");
        let generator = Arc::new(CancelOnClassify {
            cancel: request.cancel.clone(),
        });
        let sink = MemoryAuditSink::default();
        let report = investigator_with(generator, false)
            .investigate(&request, &sink)
            .expect("report");
        let execution = report.execution.as_ref().expect("execution");
        assert!(execution.cancelled);
        assert!(execution.results.is_empty());
        assert_eq!(execution.counts.executed, 0);
        assert_eq!(execution.status, RunStatus::Failed);
        assert!(matches!(report.interpretation, InterpretationOutcome::Skipped { .. }));
        assert_eq!(sink.records().len(), 1);
    }

    #[test]
    fn cancelled_request_does_not_execute() {
        let request = InvestigationRequest::new("high cpu");
        request.cancel.cancel();
        let sink = MemoryAuditSink::default();
        let err = investigator(ScriptedGenerator::new([CLASSIFIED]), false)
            .investigate(&request, &sink)
            .unwrap_err();
        assert!(matches!(err, InvestigationError::Cancelled));
        assert!(sink.records().is_empty());
    }

    #[test]
    fn unresolved_strategy_fails_construction() {
        let collaborators = Collaborators {
            generator: Arc::new(ScriptedGenerator::new([CLASSIFIED])),
            cloud: Arc::new(FixtureCloud),
            orchestrator: Arc::new(FixtureOrchestrator),
        };
        let result = Investigator::with_registry(
            collaborators,
            RegistryBuilder::new(),
            StrategyTable::default(),
            settings(),
        );
        assert!(matches!(result, Err(InvestigationError::Registry(_))));
    }

    #[test]
    fn playbook_path_audits_in_playbook_mode() {
        let sink = MemoryAuditSink::default();
        let report = investigator(ScriptedGenerator::new([CLASSIFIED]), false)
            .investigate_playbook(&InvestigationRequest::new("high cpu on eks"), &sink)
            .expect("report");
        assert_eq!(report.plan.playbook_id, "investigate_k8s_high_cpu");
        assert_eq!(report.status(), Some(RunStatus::Completed));
        assert_eq!(sink.records()[0].mode, AuditMode::Playbook);
        assert_eq!(sink.records()[0].steps_executed, 4);
    }

    #[test]
    fn protected_scope_still_runs_read_only_plans() {
        let sink = MemoryAuditSink::default();
        let request = InvestigationRequest {
            scope: Some("production".to_string()),
            ..InvestigationRequest::new("high cpu")
        };
        let report = investigator(ScriptedGenerator::new([CLASSIFIED, INTERPRETED]), false)
            .investigate(&request, &sink)
            .expect("report");
        assert_eq!(report.classification.scope, "production");
        assert!(!report.plan.needs_approval());
    }
}
