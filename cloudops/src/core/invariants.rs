//! Semantic invariants of pipeline values.
//!
//! Each check returns every violation found, empty when the value is sound.

use std::collections::HashSet;

use crate::core::types::{Classification, ExecutionResult, Interpretation, Plan, RunStatus};

/// - `secondary_classes` has no duplicates and excludes `primary_class`
/// - `confidence` in `[0, 1]`
/// - `time_window > 0`
pub fn validate_classification(classification: &Classification) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for class in &classification.secondary_classes {
        if *class == classification.primary_class {
            errors.push(format!("secondary_classes contains primary class {class}"));
        }
        if !seen.insert(*class) {
            errors.push(format!("duplicate secondary class {class}"));
        }
    }
    check_unit_interval("classification confidence", classification.confidence, &mut errors);
    if classification.time_window == 0 {
        errors.push("time_window must be > 0".to_string());
    }
    errors
}

/// - Primitive names unique
/// - Each step's risk matches its primitive's tier
pub fn validate_plan(plan: &Plan) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for (index, step) in plan.steps.iter().enumerate() {
        if !seen.insert(step.primitive) {
            errors.push(format!(
                "step {index}: duplicate primitive {}",
                step.primitive
            ));
        }
        if step.risk_level != step.primitive.risk_level() {
            errors.push(format!(
                "step {index}: risk {} differs from {} tier {}",
                step.risk_level,
                step.primitive,
                step.primitive.risk_level()
            ));
        }
    }
    errors
}

/// - `succeeded + failed == executed == len(results)`
/// - `failed` iff `succeeded == 0`, `completed` iff `failed == 0`
/// - Failed results carry an error and no facts
pub fn validate_execution(result: &ExecutionResult) -> Vec<String> {
    let mut errors = Vec::new();
    let counts = result.counts;
    if counts.succeeded + counts.failed != counts.executed {
        errors.push(format!(
            "succeeded {} + failed {} != executed {}",
            counts.succeeded, counts.failed, counts.executed
        ));
    }
    if counts.executed != result.results.len() {
        errors.push(format!(
            "executed {} != {} results",
            counts.executed,
            result.results.len()
        ));
    }
    if (result.status == RunStatus::Failed) != (counts.succeeded == 0) {
        errors.push(format!(
            "status {} inconsistent with {} succeeded",
            result.status, counts.succeeded
        ));
    }
    if (result.status == RunStatus::Completed) != (counts.failed == 0 && counts.succeeded > 0) {
        errors.push(format!(
            "status {} inconsistent with {} failed",
            result.status, counts.failed
        ));
    }
    for item in &result.results {
        if !item.success && (item.error.is_none() || !item.facts.is_empty()) {
            errors.push(format!(
                "{}: failed result must carry an error and no facts",
                item.primitive_name
            ));
        }
    }
    errors
}

/// Confidence bounds on the interpretation and each hypothesis.
pub fn validate_interpretation(interpretation: &Interpretation) -> Vec<String> {
    let mut errors = Vec::new();
    check_unit_interval(
        "interpretation confidence",
        interpretation.confidence,
        &mut errors,
    );
    for hypothesis in &interpretation.hypotheses {
        check_unit_interval(
            &format!("hypothesis '{}' confidence", hypothesis.cause),
            hypothesis.confidence,
            &mut errors,
        );
    }
    errors
}

fn check_unit_interval(label: &str, value: f64, errors: &mut Vec<String>) {
    if !(0.0..=1.0).contains(&value) {
        errors.push(format!("{label} {value} outside [0, 1]"));
    }
}
