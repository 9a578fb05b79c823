//! Terminal and JSON rendering of investigation output.
//!
//! Facts and hypotheses are rendered under separate headings; nothing a
//! hypothesis says is ever printed as a finding.

use std::fmt::Write as _;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::types::{ExecutionResult, Interpretation, Plan};
use crate::investigate::{InterpretationOutcome, InvestigationReport, PlaybookReport};
use crate::io::audit::AuditRecord;
use crate::playbook::PlaybookExecution;

/// Pretty JSON with a trailing newline.
pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
    let mut payload = serde_json::to_string_pretty(value).context("serialize report")?;
    payload.push('\n');
    Ok(payload)
}

/// Text report. `explain` adds the plan summary under the step list.
pub fn render_investigation(report: &InvestigationReport, explain: bool) -> String {
    let mut out = String::new();
    let c = &report.classification;
    let _ = writeln!(out, "Query: {}", report.query);
    let _ = writeln!(
        out,
        "Incident: {} (confidence {:.2}, scope {})",
        c.primary_class, c.confidence, c.scope
    );
    if !c.secondary_classes.is_empty() {
        let names: Vec<&str> = c.secondary_classes.iter().map(|class| class.as_str()).collect();
        let _ = writeln!(out, "Also considered: {}", names.join(", "));
    }
    if let Some(resource) = c.resource_id.as_deref().or(c.resource_type.as_deref()) {
        let _ = writeln!(out, "Resource: {resource}");
    }
    out.push('\n');
    render_plan(&mut out, &report.plan);
    if explain {
        let _ = writeln!(out, "\nExplanation:\n{}", report.plan.summary);
    }

    let Some(execution) = &report.execution else {
        let _ = writeln!(out, "\nDry run: nothing executed.");
        return out;
    };
    out.push('\n');
    render_execution(&mut out, execution);
    out.push('\n');
    match &report.interpretation {
        InterpretationOutcome::Ready(interpretation) => {
            render_interpretation(&mut out, interpretation);
        }
        InterpretationOutcome::Failed { error } => {
            let _ = writeln!(out, "Interpretation failed: {error}");
            let _ = writeln!(out, "The facts above are still valid.");
        }
        InterpretationOutcome::Skipped { reason } => {
            let _ = writeln!(out, "Interpretation skipped: {reason}");
        }
    }
    if !report.grounding_gaps.is_empty() {
        let _ = writeln!(out, "\nWarning: evidence not found in collected facts:");
        for gap in &report.grounding_gaps {
            if gap.evidence.is_empty() {
                let _ = writeln!(out, "  - {} (no evidence given)", gap.cause);
            } else {
                let _ = writeln!(out, "  - {}: {}", gap.cause, gap.evidence);
            }
        }
    }
    render_audit_outcome(&mut out, report.audit_id.as_deref(), report.audit_error.as_deref());
    out
}

fn render_audit_outcome(out: &mut String, audit_id: Option<&str>, audit_error: Option<&str>) {
    if let Some(id) = audit_id {
        let _ = writeln!(out, "\nAudit id: {id}");
    }
    if let Some(error) = audit_error {
        let _ = writeln!(out, "\nWarning: audit record not written: {error}");
    }
}

fn render_plan(out: &mut String, plan: &Plan) {
    let _ = writeln!(
        out,
        "Plan {} ({} steps, ~{}s, ~${:.4})",
        plan.plan_id,
        plan.steps.len(),
        plan.estimated_duration_secs,
        plan.estimated_cost_usd()
    );
    for (idx, step) in plan.steps.iter().enumerate() {
        let approval = if step.requires_approval { " [approval required]" } else { "" };
        let _ = writeln!(
            out,
            "  {}. {} ({}){approval}",
            idx + 1,
            step.primitive,
            step.risk_level
        );
    }
}

fn render_execution(out: &mut String, execution: &ExecutionResult) {
    let counts = execution.counts;
    let _ = writeln!(
        out,
        "Execution {}: {} executed, {} succeeded, {} failed in {}ms{}",
        execution.status,
        counts.executed,
        counts.succeeded,
        counts.failed,
        execution.duration_ms(),
        if execution.cancelled { " (cancelled)" } else { "" }
    );
    for result in &execution.results {
        if result.success {
            let _ = writeln!(
                out,
                "  ok   {} ({} facts, {}ms)",
                result.primitive_name,
                result.facts.len(),
                result.duration_ms
            );
            for (key, value) in &result.facts {
                let _ = writeln!(out, "         {key}: {value}");
            }
        } else {
            let _ = writeln!(
                out,
                "  FAIL {}: {}",
                result.primitive_name,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

fn render_interpretation(out: &mut String, interpretation: &Interpretation) {
    let _ = writeln!(out, "Key findings (observed):");
    for finding in &interpretation.key_findings {
        let _ = writeln!(out, "  - {finding}");
    }
    let _ = writeln!(out, "Likely root causes (inferred):");
    for hypothesis in &interpretation.hypotheses {
        let _ = writeln!(
            out,
            "  - {} (confidence {:.2})",
            hypothesis.cause, hypothesis.confidence
        );
        for evidence in &hypothesis.evidence {
            let _ = writeln!(out, "      evidence: {evidence}");
        }
    }
    let _ = writeln!(out, "Recommended actions:");
    let mut actions: Vec<_> = interpretation.actions.iter().collect();
    actions.sort_by_key(|action| action.priority);
    for action in actions {
        let _ = writeln!(out, "  [P{}] {}", action.priority, action.description);
        if let Some(command) = &action.command {
            let _ = writeln!(out, "      $ {command}");
        }
    }
    let _ = writeln!(
        out,
        "Overall confidence {:.2}{}",
        interpretation.confidence,
        if interpretation.requires_human_review {
            "; human review required"
        } else {
            ""
        }
    );
}

pub fn render_playbook(report: &PlaybookReport, explain: bool) -> String {
    let mut out = String::new();
    let plan = &report.plan;
    let _ = writeln!(out, "Query: {}", report.query);
    let _ = writeln!(
        out,
        "Playbook {} (plan {}, scope {})",
        plan.playbook_id, plan.plan_id, plan.scope
    );
    for step in &plan.steps {
        let approval = if step.requires_approval { " [approval required]" } else { "" };
        let _ = writeln!(
            out,
            "  {}. {} via {}.{} ({}, ~${:.4}){approval}",
            step.step_id,
            step.action,
            step.provider,
            step.call.method(),
            step.risk_level,
            step.estimated_cost_usd
        );
    }
    if explain {
        let _ = writeln!(out, "\nExplanation:\n{}", plan.summary);
    }
    match &report.execution {
        Some(execution) => {
            out.push('\n');
            render_playbook_execution(&mut out, execution);
        }
        None => {
            let _ = writeln!(out, "\nDry run: nothing executed.");
        }
    }
    render_audit_outcome(&mut out, report.audit_id.as_deref(), report.audit_error.as_deref());
    out
}

fn render_playbook_execution(out: &mut String, execution: &PlaybookExecution) {
    let _ = writeln!(
        out,
        "Execution {}: {} of {} steps succeeded",
        execution.status,
        execution.succeeded(),
        execution.results.len()
    );
    for result in &execution.results {
        match &result.error {
            None => {
                let _ = writeln!(out, "  ok   {}. {}", result.step_id, result.action);
            }
            Some(error) => {
                let _ = writeln!(out, "  FAIL {}. {}: {error}", result.step_id, result.action);
            }
        }
    }
    if let Some(step) = execution.stopped_at {
        let _ = writeln!(out, "Stopped after step {step}.");
    }
}

pub fn render_audit(records: &[AuditRecord]) -> String {
    if records.is_empty() {
        return "No audit records.\n".to_string();
    }
    let mut out = String::new();
    for record in records {
        let class = record
            .incident_class
            .map(|class| class.as_str())
            .unwrap_or("-");
        let _ = writeln!(
            out,
            "{}  {:<10} {:<9} {:<24} {:<8} risk={} cost=${:.4} {}ms  {}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.user,
            record.status.as_str(),
            class,
            record.plan_id,
            record.highest_risk,
            record.cost_usd,
            record.duration_ms,
            record.query
        );
    }
    out
}
