//! Versioned prompt templates for the two reasoning call sites.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::classifier::DEFAULT_TIME_WINDOW_SECS;
use crate::core::types::{Facts, IncidentClass};

/// Bumped whenever either template changes meaning.
pub const PROMPT_VERSION: &str = "v1";

const CLASSIFY_TEMPLATE: &str = include_str!("prompts/classify.md");
const INTERPRET_TEMPLATE: &str = include_str!("prompts/interpret.md");

pub const CLASSIFY_SYSTEM: &str =
    "You are a cloud incident classifier. Respond with valid JSON only.";
pub const INTERPRET_SYSTEM: &str = "You are a cloud incident analyst. You separate observed \
     facts from inferred causes and never invent data. Respond with valid JSON only.";

#[derive(Serialize)]
struct ClassEntry {
    name: &'static str,
    description: &'static str,
}

#[derive(Serialize)]
struct FactEntry<'a> {
    primitive: &'a str,
    json: String,
}

pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("classify", CLASSIFY_TEMPLATE)
            .expect("classify template should be valid");
        env.add_template("interpret", INTERPRET_TEMPLATE)
            .expect("interpret template should be valid");
        Self { env }
    }

    /// Classification prompt listing the closed class set.
    pub fn render_classification(&self, query: &str, prior_context: Option<&str>) -> Result<String> {
        let classes: Vec<ClassEntry> = IncidentClass::ALL
            .into_iter()
            .map(|class| ClassEntry {
                name: class.as_str(),
                description: class.description(),
            })
            .collect();
        let template = self.env.get_template("classify")?;
        let rendered = template.render(context! {
            version => PROMPT_VERSION,
            query => query.trim(),
            prior_context => prior_context.map(str::trim).filter(|s| !s.is_empty()),
            classes => classes,
            default_time_window => DEFAULT_TIME_WINDOW_SECS,
        })?;
        Ok(rendered)
    }

    /// Interpretation prompt with each primitive's facts rendered verbatim.
    pub fn render_interpretation(
        &self,
        incident_class: IncidentClass,
        facts: &BTreeMap<String, Facts>,
    ) -> Result<String> {
        let entries = facts
            .iter()
            .map(|(primitive, facts)| {
                Ok(FactEntry {
                    primitive,
                    json: serde_json::to_string_pretty(facts)
                        .with_context(|| format!("render facts of {primitive}"))?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let template = self.env.get_template("interpret")?;
        let rendered = template.render(context! {
            version => PROMPT_VERSION,
            incident_class => incident_class.as_str(),
            facts => entries,
        })?;
        Ok(rendered)
    }
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}
