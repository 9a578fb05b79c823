//! Incident classifier: free-text query to validated [`Classification`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use jsonschema::Validator;
use tracing::{debug, instrument};

use crate::core::classifier::{RawClassification, validate_classification};
use crate::core::types::Classification;
use crate::error::ClassificationError;
use crate::io::generator::{GenerationRequest, TextGenerator};
use crate::io::prompt::{CLASSIFY_SYSTEM, PromptEngine};

use super::{compile_schema, extract_json, schema_errors};

const CLASSIFICATION_SCHEMA: &str = include_str!("../../schemas/classification.schema.json");

/// Classification is a lookup, not a creative task.
pub const CLASSIFY_TEMPERATURE: f32 = 0.0;
pub const CLASSIFY_MAX_TOKENS: u32 = 500;

pub struct IncidentClassifier {
    generator: Arc<dyn TextGenerator>,
    prompts: PromptEngine,
    schema: Validator,
    timeout: Duration,
    default_scope: String,
}

impl IncidentClassifier {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        timeout: Duration,
        default_scope: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            generator,
            prompts: PromptEngine::new(),
            schema: compile_schema(CLASSIFICATION_SCHEMA)?,
            timeout,
            default_scope: default_scope.into(),
        })
    }

    /// Classify `query`. A caller-supplied `scope` replaces whatever scope the
    /// response names. The confidence threshold is not applied here.
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs()))]
    pub fn classify(
        &self,
        query: &str,
        prior_context: Option<&str>,
        scope: Option<&str>,
    ) -> Result<Classification, ClassificationError> {
        let prompt = self
            .prompts
            .render_classification(query, prior_context)
            .map_err(|err| ClassificationError::Generation(format!("render prompt: {err:#}")))?;
        let request = GenerationRequest {
            prompt,
            system: Some(CLASSIFY_SYSTEM.to_string()),
            temperature: CLASSIFY_TEMPERATURE,
            max_tokens: CLASSIFY_MAX_TOKENS,
            timeout: self.timeout,
        };
        let text = self
            .generator
            .generate(&request)
            .map_err(|err| ClassificationError::Generation(format!("{err:#}")))?;

        let value = extract_json(&text).map_err(ClassificationError::NotJson)?;
        let errors = schema_errors(&self.schema, &value);
        if !errors.is_empty() {
            return Err(ClassificationError::Schema(errors));
        }
        let raw: RawClassification = serde_json::from_value(value)
            .map_err(|err| ClassificationError::Schema(vec![err.to_string()]))?;
        let classification = validate_classification(raw, scope, &self.default_scope)?;
        debug!(
            primary = %classification.primary_class,
            confidence = classification.confidence,
            "classified"
        );
        Ok(classification)
    }
}
