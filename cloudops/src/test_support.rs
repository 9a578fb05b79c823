//! Test doubles and builders shared by unit and integration tests.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use chrono::Utc;
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::core::context::{SharedContext, enrichment_key};
use crate::core::types::{
    Classification, ExecutionResult, Facts, IncidentClass, PrimitiveKind, PrimitiveResult,
};
use crate::executor::Cancellation;
use crate::io::audit::{AuditRecord, AuditSink};
use crate::io::cloud::{
    ChangeEvent, CloudApi, CostBreakdown, MetricQuery, MetricSeries, ResourceTarget,
    ScalingConfig, SecurityRule, TimeWindow,
};
use crate::io::config::{CloudopsConfig, config_path, write_config};
use crate::io::generator::{GenerationRequest, TextGenerator};
use crate::io::orchestrator::{ClusterNode, Deployment, NamespaceSelector, OrchestratorApi, Workload};
use crate::primitives::Primitive;

/// Fact map from a JSON object literal.
pub fn facts(value: Value) -> Facts {
    match value {
        Value::Object(map) => map,
        other => panic!("facts must be an object, got {other}"),
    }
}

/// Generator that replays canned responses in order and records requests.
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<std::result::Result<String, String>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new<'a>(responses: impl IntoIterator<Item = &'a str>) -> Self {
        Self::with_results(responses.into_iter().map(|r| Ok(r.to_string())))
    }

    /// Every call fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self::with_results([Err(message.to_string())])
    }

    pub fn with_results(
        results: impl IntoIterator<Item = std::result::Result<String, String>>,
    ) -> Self {
        Self {
            responses: Mutex::new(results.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl TextGenerator for ScriptedGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let mut responses = self.responses.lock().expect("responses lock");
        let next = if responses.len() == 1 {
            responses.front().cloned()
        } else {
            responses.pop_front()
        };
        match next {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(anyhow!(message)),
            None => bail!("no scripted response left"),
        }
    }
}

/// Returns the same facts on every call.
pub struct StaticPrimitive {
    kind: PrimitiveKind,
    facts: Facts,
}

impl StaticPrimitive {
    pub fn new(kind: PrimitiveKind, value: Value) -> Self {
        Self {
            kind,
            facts: facts(value),
        }
    }
}

impl Primitive for StaticPrimitive {
    fn kind(&self) -> PrimitiveKind {
        self.kind
    }

    fn execute(&self, _context: &SharedContext) -> Result<Facts> {
        Ok(self.facts.clone())
    }
}

pub struct FailingPrimitive {
    kind: PrimitiveKind,
    message: String,
}

impl FailingPrimitive {
    pub fn new(kind: PrimitiveKind, message: &str) -> Self {
        Self {
            kind,
            message: message.to_string(),
        }
    }
}

impl Primitive for FailingPrimitive {
    fn kind(&self) -> PrimitiveKind {
        self.kind
    }

    fn execute(&self, _context: &SharedContext) -> Result<Facts> {
        Err(anyhow!(self.message.clone()))
    }
}

pub struct PanickingPrimitive {
    kind: PrimitiveKind,
}

impl PanickingPrimitive {
    pub fn new(kind: PrimitiveKind) -> Self {
        Self { kind }
    }
}

impl Primitive for PanickingPrimitive {
    fn kind(&self) -> PrimitiveKind {
        self.kind
    }

    fn execute(&self, _context: &SharedContext) -> Result<Facts> {
        panic!("primitive {} blew up", self.kind)
    }
}

/// Sleeps before answering, to exercise timeouts.
pub struct SlowPrimitive {
    kind: PrimitiveKind,
    delay: Duration,
}

impl SlowPrimitive {
    pub fn new(kind: PrimitiveKind, delay: Duration) -> Self {
        Self { kind, delay }
    }
}

impl Primitive for SlowPrimitive {
    fn kind(&self) -> PrimitiveKind {
        self.kind
    }

    fn execute(&self, _context: &SharedContext) -> Result<Facts> {
        std::thread::sleep(self.delay);
        Ok(facts(json!({"slept_ms": self.delay.as_millis() as u64})))
    }
}

/// Reports which enrichments it could see.
pub struct ContextProbe {
    kind: PrimitiveKind,
}

impl ContextProbe {
    pub fn new(kind: PrimitiveKind) -> Self {
        Self { kind }
    }
}

impl Primitive for ContextProbe {
    fn kind(&self) -> PrimitiveKind {
        self.kind
    }

    fn execute(&self, context: &SharedContext) -> Result<Facts> {
        let visible: Vec<Value> = PrimitiveKind::ALL
            .into_iter()
            .filter_map(|kind| {
                context
                    .enrichment(kind)
                    .map(|facts| json!({"key": enrichment_key(kind), "facts": facts}))
            })
            .collect();
        Ok(facts(json!({
            "enrichment_keys": context.enrichment_keys(),
            "visible": visible,
        })))
    }
}

/// Succeeds and then requests cancellation of the running plan.
pub struct CancellingPrimitive {
    kind: PrimitiveKind,
    cancel: Cancellation,
}

impl CancellingPrimitive {
    pub fn new(kind: PrimitiveKind, cancel: Cancellation) -> Self {
        Self { kind, cancel }
    }
}

impl Primitive for CancellingPrimitive {
    fn kind(&self) -> PrimitiveKind {
        self.kind
    }

    fn execute(&self, _context: &SharedContext) -> Result<Facts> {
        self.cancel.cancel();
        Ok(facts(json!({"cancelled_after": true})))
    }
}

#[derive(Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().expect("audit lock").clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, record: &AuditRecord) -> Result<()> {
        self.records.lock().expect("audit lock").push(record.clone());
        Ok(())
    }
}

pub struct FailingAuditSink;

impl AuditSink for FailingAuditSink {
    fn append(&self, _record: &AuditRecord) -> Result<()> {
        bail!("audit disk full")
    }
}

/// Cloud collaborator whose every call fails.
pub struct FailingCloud;

impl CloudApi for FailingCloud {
    fn fetch_metric_series(&self, _query: &MetricQuery) -> Result<MetricSeries> {
        bail!("cloudwatch unavailable")
    }

    fn list_security_rules(&self) -> Result<Vec<SecurityRule>> {
        bail!("ec2 unavailable")
    }

    fn lookup_change_events(
        &self,
        _target: &ResourceTarget,
        _window: &TimeWindow,
    ) -> Result<Vec<ChangeEvent>> {
        bail!("cloudtrail unavailable")
    }

    fn describe_scaling_config(&self, _target: &ResourceTarget) -> Result<ScalingConfig> {
        bail!("autoscaling unavailable")
    }

    fn fetch_cost_breakdown(&self, _window: &TimeWindow) -> Result<CostBreakdown> {
        bail!("cost explorer unavailable")
    }
}

pub fn failing_cloud() -> Arc<dyn CloudApi> {
    Arc::new(FailingCloud)
}

pub struct FailingOrchestrator;

impl OrchestratorApi for FailingOrchestrator {
    fn list_nodes(&self) -> Result<Vec<ClusterNode>> {
        bail!("cluster unreachable")
    }

    fn list_workloads(&self, _namespace: &NamespaceSelector) -> Result<Vec<Workload>> {
        bail!("cluster unreachable")
    }

    fn list_deployments(&self, _namespace: &NamespaceSelector) -> Result<Vec<Deployment>> {
        bail!("cluster unreachable")
    }
}

pub fn failing_orchestrator() -> Arc<dyn OrchestratorApi> {
    Arc::new(FailingOrchestrator)
}

/// Classification with deterministic defaults (`prod`, one hour).
pub fn classification(primary: IncidentClass) -> Classification {
    Classification {
        primary_class: primary,
        secondary_classes: Vec::new(),
        confidence: 0.9,
        resource_type: None,
        resource_id: None,
        metric: None,
        scope: "prod".to_string(),
        time_window: 3600,
    }
}

pub fn classification_with_secondary(
    primary: IncidentClass,
    secondary: &[IncidentClass],
) -> Classification {
    Classification {
        secondary_classes: secondary.to_vec(),
        ..classification(primary)
    }
}

pub fn context_for(resource_type: Option<&str>, metric: Option<&str>) -> SharedContext {
    let mut classification = classification(IncidentClass::ResourceSaturation);
    classification.resource_type = resource_type.map(str::to_string);
    classification.metric = metric.map(str::to_string);
    SharedContext::from_classification(&classification)
}

/// Execution result from `(primitive, facts)` pairs; `None` marks a failure.
pub fn execution_of(entries: &[(&str, Option<Value>)]) -> ExecutionResult {
    let context = context_for(None, None);
    let results = entries
        .iter()
        .map(|(name, value)| match value {
            Some(value) => PrimitiveResult::succeeded(name, &context, facts(value.clone()), 1),
            None => PrimitiveResult::failed(name, &context, "scripted failure", 1),
        })
        .collect();
    let now = Utc::now();
    ExecutionResult::from_results("plan-test", now, now, results, false)
}

/// Temporary home directory holding `config` as `config.toml`.
pub fn temp_home(config: &CloudopsConfig) -> Result<TempDir> {
    let temp = tempfile::tempdir()?;
    write_config(&config_path(temp.path()), config)?;
    Ok(temp)
}

/// Config for offline runs rooted at `home`.
pub fn offline_config(home: &Path, llm_command: Vec<String>) -> CloudopsConfig {
    let mut config = CloudopsConfig::default();
    config.llm.command = llm_command;
    config.audit.dir = Some(home.join("audit"));
    config
}
