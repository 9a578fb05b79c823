//! Deterministic validation of raw classifier output.
//!
//! The reasoning collaborator proposes a classification; this module decides
//! whether it is one. Nothing here defaults a missing or unknown class.

use serde::Deserialize;

use crate::core::types::{Classification, IncidentClass};
use crate::error::ClassificationError;

/// Default investigation window when the response omits one.
pub const DEFAULT_TIME_WINDOW_SECS: u64 = 3600;

/// Classifier response as produced by the reasoning collaborator.
#[derive(Debug, Clone, Deserialize)]
pub struct RawClassification {
    pub primary_class: String,
    #[serde(default)]
    pub secondary_classes: Vec<String>,
    pub confidence: f64,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub metric: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub time_window: Option<u64>,
}

/// Turn a raw response into a [`Classification`].
///
/// - `primary_class` and every secondary class must be in the enumeration.
/// - Secondary classes are de-duplicated (first occurrence wins) and the
///   primary class is removed from them.
/// - `confidence` must lie in `[0, 1]`.
/// - `scope_override`, when given by the caller, replaces the response scope;
///   otherwise a missing scope falls back to `default_scope`.
/// - Blank resource fields become `None`.
pub fn validate_classification(
    raw: RawClassification,
    scope_override: Option<&str>,
    default_scope: &str,
) -> Result<Classification, ClassificationError> {
    let primary_class = parse_class(&raw.primary_class)?;

    let mut secondary_classes = Vec::new();
    for name in &raw.secondary_classes {
        let class = parse_class(name)?;
        if class != primary_class && !secondary_classes.contains(&class) {
            secondary_classes.push(class);
        }
    }

    if !(0.0..=1.0).contains(&raw.confidence) {
        return Err(ClassificationError::ConfidenceOutOfRange(raw.confidence));
    }

    let time_window = raw.time_window.unwrap_or(DEFAULT_TIME_WINDOW_SECS);
    if time_window == 0 {
        return Err(ClassificationError::EmptyTimeWindow);
    }

    let scope = match scope_override {
        Some(scope) => scope.to_string(),
        None => non_blank(raw.scope).unwrap_or_else(|| default_scope.to_string()),
    };

    Ok(Classification {
        primary_class,
        secondary_classes,
        confidence: raw.confidence,
        resource_type: non_blank(raw.resource_type),
        resource_id: non_blank(raw.resource_id),
        metric: non_blank(raw.metric),
        scope,
        time_window,
    })
}

fn parse_class(name: &str) -> Result<IncidentClass, ClassificationError> {
    name.parse()
        .map_err(|_| ClassificationError::InvalidClass(name.to_string()))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(primary: &str) -> RawClassification {
        RawClassification {
            primary_class: primary.to_string(),
            secondary_classes: Vec::new(),
            confidence: 0.9,
            resource_type: Some("ec2".to_string()),
            resource_id: None,
            metric: Some("cpu".to_string()),
            scope: None,
            time_window: None,
        }
    }

    #[test]
    fn accepts_known_class_and_applies_defaults() {
        let got = validate_classification(raw("resource_saturation"), None, "production")
            .expect("valid");
        assert_eq!(got.primary_class, IncidentClass::ResourceSaturation);
        assert_eq!(got.scope, "production");
        assert_eq!(got.time_window, DEFAULT_TIME_WINDOW_SECS);
        assert_eq!(got.resource_id, None);
    }

    #[test]
    fn rejects_primary_outside_enumeration() {
        let err = validate_classification(raw("disk_full"), None, "production").unwrap_err();
        assert!(matches!(err, ClassificationError::InvalidClass(name) if name == "disk_full"));
    }

    #[test]
    fn rejects_unknown_secondary_class() {
        let mut input = raw("load_spike");
        input.secondary_classes = vec!["gremlins".to_string()];
        let err = validate_classification(input, None, "production").unwrap_err();
        assert!(matches!(err, ClassificationError::InvalidClass(_)));
    }

    #[test]
    fn secondary_classes_exclude_primary_and_duplicates() {
        let mut input = raw("load_spike");
        input.secondary_classes = vec![
            "scaling_failure".to_string(),
            "load_spike".to_string(),
            "scaling_failure".to_string(),
            "cost_anomaly".to_string(),
        ];
        let got = validate_classification(input, None, "production").expect("valid");
        assert_eq!(
            got.secondary_classes,
            vec![IncidentClass::ScalingFailure, IncidentClass::CostAnomaly]
        );
    }

    #[test]
    fn rejects_confidence_out_of_range() {
        let mut input = raw("load_spike");
        input.confidence = 1.5;
        let err = validate_classification(input, None, "production").unwrap_err();
        assert!(matches!(err, ClassificationError::ConfidenceOutOfRange(_)));
    }

    #[test]
    fn caller_scope_wins_over_response_scope() {
        let mut input = raw("load_spike");
        input.scope = Some("staging".to_string());
        let got = validate_classification(input.clone(), Some("prod"), "production").expect("valid");
        assert_eq!(got.scope, "prod");
        let got = validate_classification(input, None, "production").expect("valid");
        assert_eq!(got.scope, "staging");
    }

    #[test]
    fn blank_resource_fields_become_none() {
        let mut input = raw("load_spike");
        input.resource_type = Some("  ".to_string());
        let got = validate_classification(input, None, "production").expect("valid");
        assert_eq!(got.resource_type, None);
    }

    #[test]
    fn zero_time_window_is_rejected() {
        let mut input = raw("load_spike");
        input.time_window = Some(0);
        let err = validate_classification(input, None, "production").unwrap_err();
        assert!(matches!(err, ClassificationError::EmptyTimeWindow));
    }
}
