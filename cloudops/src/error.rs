//! Error taxonomy for the investigation pipeline.
//!
//! Each stage owns a typed error. [`InvestigationError`] is what the pipeline
//! returns to its caller; primitive failures never appear here because the
//! executor records them as failed results and keeps going.

use thiserror::Error;

use crate::core::types::{IncidentClass, PrimitiveKind, RiskLevel};

/// Malformed or out-of-enumeration classifier output.
#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("text generation failed: {0}")]
    Generation(String),
    #[error("classifier response is not JSON: {0}")]
    NotJson(String),
    #[error("classifier response violates schema:\n- {}", .0.join("\n- "))]
    Schema(Vec<String>),
    #[error("invalid classification: '{0}' is not an incident class")]
    InvalidClass(String),
    #[error("invalid classification: confidence {0} outside [0, 1]")]
    ConfidenceOutOfRange(f64),
    #[error("invalid classification: time_window must be > 0")]
    EmptyTimeWindow,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ComposeError {
    #[error("no strategy for incident class {0}")]
    UnknownIncidentClass(IncidentClass),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown primitive '{0}'")]
    UnknownPrimitive(String),
    #[error("primitive {0} is not registered")]
    NotRegistered(PrimitiveKind),
    #[error("strategy for {class} references unregistered primitive {primitive}")]
    Unresolved {
        class: IncidentClass,
        primitive: PrimitiveKind,
    },
}

/// Malformed reasoning-stage output. The execution result stays valid.
#[derive(Debug, Error)]
pub enum InterpretationError {
    #[error("text generation failed: {0}")]
    Generation(String),
    #[error("interpretation response is not JSON: {0}")]
    NotJson(String),
    #[error("interpretation response violates schema:\n- {}", .0.join("\n- "))]
    Schema(Vec<String>),
    #[error("interpretation response has invalid shape: {0}")]
    Shape(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlaybookError {
    #[error("no playbook matches resource type '{resource_type}' (metric: {})", .metric.as_deref().unwrap_or("none"))]
    NoMatch {
        resource_type: String,
        metric: Option<String>,
    },
}

/// A step that requires approval was about to run without it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("step {step} ({risk}) requires approval in scope '{scope}'")]
pub struct PolicyViolation {
    pub step: String,
    pub risk: RiskLevel,
    pub scope: String,
}

#[derive(Debug, Error)]
pub enum InvestigationError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Classification(#[from] ClassificationError),
    #[error("classification confidence {confidence:.2} below threshold {threshold:.2}; please rephrase")]
    LowConfidence { confidence: f64, threshold: f64 },
    #[error(transparent)]
    Compose(#[from] ComposeError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Playbook(#[from] PlaybookError),
    #[error(transparent)]
    Policy(#[from] PolicyViolation),
    #[error("investigation cancelled before classification")]
    Cancelled,
}
