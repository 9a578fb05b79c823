//! Interpreter: execution facts to findings, hypotheses and actions.
//!
//! Only facts from successful primitives reach the prompt. The response must
//! be a JSON object matching the interpretation schema; nothing malformed is
//! repaired. The execution result is only ever borrowed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use jsonschema::Validator;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::invariants::validate_interpretation;
use crate::core::types::{ExecutionResult, Facts, IncidentClass, Interpretation};
use crate::error::InterpretationError;
use crate::io::generator::{GenerationRequest, TextGenerator};
use crate::io::prompt::{INTERPRET_SYSTEM, PromptEngine};

use super::{compile_schema, extract_json, schema_errors};

const INTERPRETATION_SCHEMA: &str = include_str!("../../schemas/interpretation.schema.json");

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterpreterSettings {
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

pub struct Interpreter {
    generator: Arc<dyn TextGenerator>,
    prompts: PromptEngine,
    schema: Validator,
    settings: InterpreterSettings,
}

impl Interpreter {
    pub fn new(generator: Arc<dyn TextGenerator>, settings: InterpreterSettings) -> Result<Self> {
        Ok(Self {
            generator,
            prompts: PromptEngine::new(),
            schema: compile_schema(INTERPRETATION_SCHEMA)?,
            settings,
        })
    }

    #[instrument(skip_all, fields(plan_id = %execution.plan_id, incident_class = %incident_class))]
    pub fn interpret(
        &self,
        execution: &ExecutionResult,
        incident_class: IncidentClass,
    ) -> Result<Interpretation, InterpretationError> {
        let facts = collect_facts(execution);
        let prompt = self
            .prompts
            .render_interpretation(incident_class, &facts)
            .map_err(|err| InterpretationError::Generation(format!("render prompt: {err:#}")))?;
        let request = GenerationRequest {
            prompt,
            system: Some(INTERPRET_SYSTEM.to_string()),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            timeout: self.settings.timeout,
        };
        let text = self
            .generator
            .generate(&request)
            .map_err(|err| InterpretationError::Generation(format!("{err:#}")))?;
        let interpretation = parse_interpretation(&self.schema, &text)?;
        debug!(
            findings = interpretation.key_findings.len(),
            hypotheses = interpretation.hypotheses.len(),
            "interpreted"
        );
        Ok(interpretation)
    }
}

fn parse_interpretation(schema: &Validator, text: &str) -> Result<Interpretation, InterpretationError> {
    let value = extract_json(text).map_err(InterpretationError::NotJson)?;
    let errors = schema_errors(schema, &value);
    if !errors.is_empty() {
        return Err(InterpretationError::Schema(errors));
    }
    let interpretation: Interpretation = serde_json::from_value(value)
        .map_err(|err| InterpretationError::Shape(err.to_string()))?;
    let violations = validate_interpretation(&interpretation);
    if !violations.is_empty() {
        return Err(InterpretationError::Shape(violations.join("; ")));
    }
    Ok(interpretation)
}

/// Facts of successful results keyed by primitive name.
pub fn collect_facts(execution: &ExecutionResult) -> BTreeMap<String, Facts> {
    execution
        .successful()
        .map(|result| (result.primitive_name.clone(), result.facts.clone()))
        .collect()
}

/// Hypothesis evidence that cites nothing from the input facts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroundingGap {
    pub cause: String,
    pub evidence: String,
}

/// Evidence strings mentioning neither a primitive name nor any fact key
/// (at any depth). Hypotheses without evidence are reported once with empty
/// evidence. The interpretation itself is left untouched.
pub fn grounding_gaps(
    interpretation: &Interpretation,
    facts: &BTreeMap<String, Facts>,
) -> Vec<GroundingGap> {
    let mut terms = BTreeSet::new();
    for (primitive, map) in facts {
        terms.insert(primitive.to_ascii_lowercase());
        collect_keys(map, &mut terms);
    }

    let mut gaps = Vec::new();
    for hypothesis in &interpretation.hypotheses {
        if hypothesis.evidence.is_empty() {
            gaps.push(GroundingGap {
                cause: hypothesis.cause.clone(),
                evidence: String::new(),
            });
            continue;
        }
        for evidence in &hypothesis.evidence {
            let lowered = evidence.to_ascii_lowercase();
            if !terms.iter().any(|term| lowered.contains(term.as_str())) {
                gaps.push(GroundingGap {
                    cause: hypothesis.cause.clone(),
                    evidence: evidence.clone(),
                });
            }
        }
    }
    gaps
}

fn collect_keys(map: &Facts, terms: &mut BTreeSet<String>) {
    for (key, value) in map {
        terms.insert(key.to_ascii_lowercase());
        collect_value_keys(value, terms);
    }
}

fn collect_value_keys(value: &Value, terms: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => collect_keys(map, terms),
        Value::Array(items) => items.iter().for_each(|item| collect_value_keys(item, terms)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Hypothesis;
    use crate::test_support::{ScriptedGenerator, execution_of, facts};
    use serde_json::json;

    const GOOD: &str = r#"{
        "key_findings": ["analyze_utilization: current_value is 92.3"],
        "likely_root_causes": [
            {"cause": "CPU saturation after deploy", "confidence": 0.7,
             "evidence": ["analyze_utilization current_value 92.3", "check_recent_changes shows a deployment"]}
        ],
        "recommended_actions": [
            {"action": "Scale out the node group", "priority": 1, "command": "kubectl scale ..."},
            {"action": "Review the last deployment", "priority": 2}
        ],
        "confidence": 0.75,
        "requires_human_review": false
    }"#;

    fn settings() -> InterpreterSettings {
        InterpreterSettings {
            temperature: 0.1,
            max_tokens: 2000,
            timeout: Duration::from_secs(5),
        }
    }

    fn interpreter(generator: &Arc<ScriptedGenerator>) -> Interpreter {
        Interpreter::new(generator.clone(), settings()).expect("interpreter")
    }

    fn sample_execution() -> ExecutionResult {
        execution_of(&[
            ("analyze_utilization", Some(json!({"current_value": 92.3}))),
            ("check_recent_changes", None),
        ])
    }

    #[test]
    fn only_successful_facts_reach_the_prompt() {
        let generator = Arc::new(ScriptedGenerator::new([GOOD]));
        let execution = sample_execution();
        let got = interpreter(&generator)
            .interpret(&execution, IncidentClass::ResourceSaturation)
            .expect("interpret");
        assert_eq!(got.actions.len(), 2);
        assert_eq!(got.actions[1].command, None);

        let requests = generator.requests();
        assert_eq!(requests[0].temperature, 0.1);
        assert_eq!(requests[0].max_tokens, 2000);
        assert!(requests[0].prompt.contains("### analyze_utilization"));
        assert!(!requests[0].prompt.contains("### check_recent_changes"));
    }

    #[test]
    fn missing_key_findings_is_rejected_without_touching_execution() {
        let generator = Arc::new(ScriptedGenerator::new([r#"{
            "likely_root_causes": [], "recommended_actions": [],
            "confidence": 0.5, "requires_human_review": true}"#]));
        let execution = sample_execution();
        let before = execution.clone();
        let err = interpreter(&generator)
            .interpret(&execution, IncidentClass::ResourceSaturation)
            .unwrap_err();
        assert!(matches!(err, InterpretationError::Schema(_)), "{err}");
        assert_eq!(execution, before);
    }

    #[test]
    fn malformed_text_is_not_patched() {
        let generator = Arc::new(ScriptedGenerator::new(["{\"key_findings\": [\"x\""]));
        let err = interpreter(&generator)
            .interpret(&sample_execution(), IncidentClass::LoadSpike)
            .unwrap_err();
        assert!(matches!(err, InterpretationError::NotJson(_)));
    }

    #[test]
    fn out_of_range_confidence_is_a_shape_error() {
        let generator = Arc::new(ScriptedGenerator::new([r#"{
            "key_findings": [], "likely_root_causes": [], "recommended_actions": [],
            "confidence": 1.4, "requires_human_review": true}"#]));
        let err = interpreter(&generator)
            .interpret(&sample_execution(), IncidentClass::LoadSpike)
            .unwrap_err();
        assert!(matches!(err, InterpretationError::Shape(_)));
    }

    #[test]
    fn generation_failure_fails_interpretation_only() {
        let generator = Arc::new(ScriptedGenerator::failing("exited with 1"));
        let err = interpreter(&generator)
            .interpret(&sample_execution(), IncidentClass::LoadSpike)
            .unwrap_err();
        assert!(matches!(err, InterpretationError::Generation(_)));
    }

    #[test]
    fn grounding_gaps_flag_uncited_evidence() {
        let mut input = BTreeMap::new();
        input.insert(
            "analyze_utilization".to_string(),
            facts(json!({"current_value": 92.3, "recent": [{"timestamp": "t"}]})),
        );
        let interpretation = Interpretation {
            key_findings: Vec::new(),
            hypotheses: vec![
                Hypothesis {
                    cause: "saturation".to_string(),
                    confidence: 0.8,
                    evidence: vec![
                        "Current_Value reached 92.3".to_string(),
                        "timestamp of the spike".to_string(),
                        "memory leak in the payment service".to_string(),
                    ],
                },
                Hypothesis {
                    cause: "unknown".to_string(),
                    confidence: 0.1,
                    evidence: Vec::new(),
                },
            ],
            actions: Vec::new(),
            confidence: 0.6,
            requires_human_review: true,
        };
        let gaps = grounding_gaps(&interpretation, &input);
        assert_eq!(
            gaps,
            vec![
                GroundingGap {
                    cause: "saturation".to_string(),
                    evidence: "memory leak in the payment service".to_string(),
                },
                GroundingGap {
                    cause: "unknown".to_string(),
                    evidence: String::new(),
                },
            ]
        );
    }
}
