//! Typed context shared by the primitives of one plan.
//!
//! The resource fields are copied verbatim from the classification. The only
//! mutable part is the enrichment store: after a primitive succeeds the
//! executor records its facts under that primitive's kind, so later primitives
//! in the same plan can read earlier results. Keys are bounded by
//! [`PrimitiveKind`] and serialize as `"<primitive_name>_result"`.

use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};

use crate::core::types::{Classification, Facts, PrimitiveKind};

/// Default lookback for change-event queries.
pub const DEFAULT_LOOKBACK_HOURS: u32 = 24;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SharedContext {
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub metric: Option<String>,
    pub scope: String,
    pub time_window: u64,
    pub lookback_hours: u32,
    #[serde(serialize_with = "serialize_enrichments")]
    enrichments: Vec<(PrimitiveKind, Facts)>,
}

impl SharedContext {
    pub fn from_classification(classification: &Classification) -> Self {
        Self {
            resource_type: classification.resource_type.clone(),
            resource_id: classification.resource_id.clone(),
            metric: classification.metric.clone(),
            scope: classification.scope.clone(),
            time_window: classification.time_window,
            lookback_hours: DEFAULT_LOOKBACK_HOURS,
            enrichments: Vec::new(),
        }
    }

    /// Resource type for labelling results; `"unknown"` when not extracted.
    pub fn resource_type_label(&self) -> &str {
        self.resource_type.as_deref().unwrap_or("unknown")
    }

    pub fn metric_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.metric.as_deref().unwrap_or(default)
    }

    /// Record facts from a successful primitive, replacing earlier facts for
    /// the same kind while keeping its original position.
    pub fn record(&mut self, kind: PrimitiveKind, facts: Facts) {
        match self.enrichments.iter_mut().find(|(k, _)| *k == kind) {
            Some(entry) => entry.1 = facts,
            None => self.enrichments.push((kind, facts)),
        }
    }

    pub fn enrichment(&self, kind: PrimitiveKind) -> Option<&Facts> {
        self.enrichments
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, facts)| facts)
    }

    /// Enrichment keys in recording order.
    pub fn enrichment_keys(&self) -> Vec<String> {
        self.enrichments
            .iter()
            .map(|(kind, _)| enrichment_key(*kind))
            .collect()
    }
}

pub fn enrichment_key(kind: PrimitiveKind) -> String {
    format!("{}_result", kind.as_str())
}

fn serialize_enrichments<S: Serializer>(
    enrichments: &[(PrimitiveKind, Facts)],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(enrichments.len()))?;
    for (kind, facts) in enrichments {
        map.serialize_entry(&enrichment_key(*kind), facts)?;
    }
    map.end()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::IncidentClass;
    use serde_json::json;

    fn classification() -> Classification {
        Classification {
            primary_class: IncidentClass::ResourceSaturation,
            secondary_classes: Vec::new(),
            confidence: 0.9,
            resource_type: Some("rds".to_string()),
            resource_id: None,
            metric: Some("cpu".to_string()),
            scope: "prod".to_string(),
            time_window: 1800,
        }
    }

    fn facts(value: serde_json::Value) -> Facts {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn copies_classification_fields_verbatim() {
        let ctx = SharedContext::from_classification(&classification());
        assert_eq!(ctx.resource_type.as_deref(), Some("rds"));
        assert_eq!(ctx.resource_id, None);
        assert_eq!(ctx.metric.as_deref(), Some("cpu"));
        assert_eq!(ctx.scope, "prod");
        assert_eq!(ctx.time_window, 1800);
        assert!(ctx.enrichment_keys().is_empty());
    }

    #[test]
    fn record_keeps_first_position_and_replaces_facts() {
        let mut ctx = SharedContext::from_classification(&classification());
        ctx.record(PrimitiveKind::AnalyzeUtilization, facts(json!({"a": 1})));
        ctx.record(PrimitiveKind::CompareBaseline, facts(json!({"b": 2})));
        ctx.record(PrimitiveKind::AnalyzeUtilization, facts(json!({"a": 3})));

        assert_eq!(
            ctx.enrichment_keys(),
            vec!["analyze_utilization_result", "compare_baseline_result"]
        );
        let util = ctx
            .enrichment(PrimitiveKind::AnalyzeUtilization)
            .expect("recorded");
        assert_eq!(util.get("a"), Some(&json!(3)));
    }

    #[test]
    fn serializes_enrichments_under_namespaced_keys() {
        let mut ctx = SharedContext::from_classification(&classification());
        ctx.record(PrimitiveKind::TraceDependencies, facts(json!({"dependency_count": 2})));
        let value = serde_json::to_value(&ctx).expect("serialize");
        assert_eq!(
            value["enrichments"]["trace_dependencies_result"]["dependency_count"],
            json!(2)
        );
    }
}
