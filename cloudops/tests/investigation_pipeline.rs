//! End-to-end pipeline tests: classification through audit, with the
//! text-generation collaborator scripted and primitives mocked or backed by
//! the offline fixtures.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;

use cloudops::agents::interpreter::collect_facts;
use cloudops::core::strategy::StrategyTable;
use cloudops::core::types::{IncidentClass, RunStatus};
use cloudops::investigate::{
    Collaborators, InvestigationRequest, Investigator, PipelineSettings,
};
use cloudops::io::audit::{AuditSink, JsonlAuditLog};
use cloudops::io::config::CloudopsConfig;
use cloudops::io::fixtures::{FixtureCloud, FixtureOrchestrator};
use cloudops::io::generator::TextGenerator;
use cloudops::primitives::{Primitive, RegistryBuilder};
use cloudops::test_support::{MemoryAuditSink, ScriptedGenerator, StaticPrimitive};

const CLASSIFIED: &str = r#"```json
{"primary_class": "resource_saturation", "secondary_classes": ["load_spike"],
 "confidence": 0.93, "resource_type": "eks", "resource_id": "prod-cluster",
 "metric": "cpu", "scope": "prod", "time_window": 3600}
```"#;

const INTERPRETED: &str = r#"{
  "key_findings": [
    "analyze_utilization reports current 91.5 against average 78.2",
    "check_recent_changes found 1 deployment"
  ],
  "likely_root_causes": [
    {"cause": "new deployment increased cpu demand", "confidence": 0.65,
     "evidence": ["check_recent_changes deployment", "analyze_utilization current"]}
  ],
  "recommended_actions": [
    {"action": "roll back the latest deployment", "priority": 1,
     "command": "kubectl rollout undo deployment/api-gateway"}
  ],
  "confidence": 0.7,
  "requires_human_review": true
}"#;

fn settings() -> PipelineSettings {
    PipelineSettings::from_config(&CloudopsConfig::default()).expect("settings")
}

fn mocked_registry() -> RegistryBuilder {
    StrategyTable::default()
        .referenced_primitives()
        .into_iter()
        .fold(RegistryBuilder::new(), |builder, kind| {
            let facts = match kind.as_str() {
                "analyze_utilization" => json!({"current": 91.5, "average": 78.2}),
                "check_recent_changes" => json!({"total": 1, "deployments": 1}),
                other => json!({"checked": other}),
            };
            let primitive: Arc<dyn Primitive> = Arc::new(StaticPrimitive::new(kind, facts));
            builder.register(primitive)
        })
}

#[test]
fn high_cpu_on_prod_cluster_end_to_end() {
    let generator = Arc::new(ScriptedGenerator::new([CLASSIFIED, INTERPRETED]));
    let collaborators = Collaborators {
        generator: generator.clone() as Arc<dyn TextGenerator>,
        cloud: Arc::new(FixtureCloud),
        orchestrator: Arc::new(FixtureOrchestrator),
    };
    let investigator = Investigator::with_registry(
        collaborators,
        mocked_registry(),
        StrategyTable::default(),
        settings(),
    )
    .expect("investigator");
    let sink = MemoryAuditSink::default();
    let request = InvestigationRequest {
        scope: Some("prod".to_string()),
        ..InvestigationRequest::new("high cpu on prod cluster")
    };

    let report = investigator.investigate(&request, &sink).expect("report");

    let classification = &report.classification;
    assert_eq!(classification.primary_class, IncidentClass::ResourceSaturation);
    assert!(classification.confidence >= 0.8);
    assert_eq!(classification.scope, "prod");

    let names = report.plan.primitive_names();
    let utilization = names.iter().position(|n| *n == "analyze_utilization");
    let changes = names.iter().position(|n| *n == "check_recent_changes");
    assert!(utilization.is_some() && changes.is_some());
    assert!(utilization < changes);
    let mut unique = names.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), names.len());

    let execution = report.execution.as_ref().expect("execution");
    assert_eq!(execution.status, RunStatus::Completed);
    assert_eq!(execution.counts.executed, names.len());

    let interpretation = report.interpretation.interpretation().expect("interpretation");
    let facts = collect_facts(execution);
    for finding in &interpretation.key_findings {
        assert!(
            facts.keys().any(|primitive| finding.contains(primitive.as_str())),
            "finding cites no collected primitive: {finding}"
        );
    }
    assert!(report.grounding_gaps.is_empty());

    let requests = generator.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].prompt.contains("high cpu on prod cluster"));
    assert!(requests[1].prompt.contains("91.5"));

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, RunStatus::Completed);
    assert_eq!(records[0].steps_executed, names.len());
}

#[test]
fn fixture_collaborators_produce_facts_for_every_step() {
    let collaborators = Collaborators {
        generator: Arc::new(ScriptedGenerator::new([CLASSIFIED, INTERPRETED])),
        cloud: Arc::new(FixtureCloud),
        orchestrator: Arc::new(FixtureOrchestrator),
    };
    let investigator = Investigator::new(collaborators, settings()).expect("investigator");
    let sink = MemoryAuditSink::default();

    let report = investigator
        .investigate(&InvestigationRequest::new("high cpu on prod cluster"), &sink)
        .expect("report");

    let execution = report.execution.expect("execution");
    assert_eq!(execution.counts.executed, report.plan.steps.len());
    assert_ne!(execution.status, RunStatus::Failed);
    let utilization = execution
        .results
        .iter()
        .find(|r| r.primitive_name == "analyze_utilization")
        .expect("utilization result");
    assert!(utilization.success);
    assert!(utilization.facts.contains_key("trend"));
}

#[test]
fn jsonl_audit_log_records_the_run() {
    let temp = tempfile::tempdir().expect("tempdir");
    let log = JsonlAuditLog::new(temp.path().join("audit"));
    let collaborators = Collaborators {
        generator: Arc::new(ScriptedGenerator::new([CLASSIFIED, INTERPRETED])),
        cloud: Arc::new(FixtureCloud),
        orchestrator: Arc::new(FixtureOrchestrator),
    };
    let investigator = Investigator::with_registry(
        collaborators,
        mocked_registry(),
        StrategyTable::default(),
        settings(),
    )
    .expect("investigator");

    let report = investigator
        .investigate(&InvestigationRequest::new("high cpu on prod cluster"), &log as &dyn AuditSink)
        .expect("report");

    let entries = log
        .read_entries(Utc::now() - Duration::hours(1), None)
        .expect("read audit");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].plan_id, report.plan.plan_id);
    assert_eq!(entries[0].incident_class, Some(IncidentClass::ResourceSaturation));
    assert_eq!(entries[0].query, "high cpu on prod cluster");
}
