//! Reasoning call sites: prompt, generate, extract, validate.

use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use jsonschema::{Draft, Validator};
use regex::Regex;
use serde_json::Value;

pub mod classifier;
pub mod interpreter;

static FENCED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^```[A-Za-z0-9_-]*[ \t]*\r?\n(.*?)\r?\n?```$").expect("fence regex is valid")
});

/// Parse a response that is a JSON object, optionally wrapped in a single
/// markdown code fence. Anything else is rejected as-is.
pub(crate) fn extract_json(text: &str) -> std::result::Result<Value, String> {
    let trimmed = text.trim();
    let body = FENCED
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map_or(trimmed, |m| m.as_str().trim());
    let value: Value = serde_json::from_str(body).map_err(|err| err.to_string())?;
    if !value.is_object() {
        return Err("expected a JSON object".to_string());
    }
    Ok(value)
}

pub(crate) fn compile_schema(raw: &str) -> Result<Validator> {
    let schema: Value = serde_json::from_str(raw).context("parse schema json")?;
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|err| anyhow!("compile json schema: {err}"))
}

pub(crate) fn schema_errors(validator: &Validator, instance: &Value) -> Vec<String> {
    validator
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect()
}
