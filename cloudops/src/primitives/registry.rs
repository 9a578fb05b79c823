//! Name → primitive lookup.
//!
//! The registry is checked against a strategy table when it is built, so a
//! plan composed from that table can only name primitives that resolve.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::strategy::StrategyTable;
use crate::core::types::PrimitiveKind;
use crate::error::RegistryError;

use super::Primitive;

#[derive(Default)]
pub struct RegistryBuilder {
    entries: BTreeMap<PrimitiveKind, Arc<dyn Primitive>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the primitive's own kind, replacing any earlier entry.
    pub fn register(mut self, primitive: Arc<dyn Primitive>) -> Self {
        self.entries.insert(primitive.kind(), primitive);
        self
    }

    /// Finish the registry, failing on the first strategy entry (in class
    /// order, then list order) that has no implementation.
    pub fn build_for(self, strategies: &StrategyTable) -> Result<PrimitiveRegistry, RegistryError> {
        for (class, strategy) in strategies.iter() {
            if let Some(missing) = strategy
                .primitives
                .iter()
                .find(|kind| !self.entries.contains_key(kind))
            {
                return Err(RegistryError::Unresolved {
                    class,
                    primitive: *missing,
                });
            }
        }
        Ok(PrimitiveRegistry {
            entries: self.entries,
        })
    }
}

/// Read-only after construction; share it behind an `Arc`.
#[derive(Clone)]
pub struct PrimitiveRegistry {
    entries: BTreeMap<PrimitiveKind, Arc<dyn Primitive>>,
}

impl PrimitiveRegistry {
    pub fn get(&self, kind: PrimitiveKind) -> Result<Arc<dyn Primitive>, RegistryError> {
        self.entries
            .get(&kind)
            .cloned()
            .ok_or(RegistryError::NotRegistered(kind))
    }

    /// Resolve a primitive by name.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Primitive>, RegistryError> {
        let kind: PrimitiveKind = name
            .parse()
            .map_err(|_| RegistryError::UnknownPrimitive(name.to_string()))?;
        self.get(kind)
    }

    pub fn contains(&self, kind: PrimitiveKind) -> bool {
        self.entries.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<PrimitiveKind> {
        self.entries.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::IncidentClass;
    use crate::test_support::StaticPrimitive;
    use serde_json::json;

    fn table() -> StrategyTable {
        StrategyTable::empty().with_strategy(
            IncidentClass::LoadSpike,
            "spike",
            &[PrimitiveKind::AnalyzeUtilization, PrimitiveKind::CheckScalingBehavior],
        )
    }

    #[test]
    fn unresolved_strategy_entry_fails_construction() {
        let err = RegistryBuilder::new()
            .register(Arc::new(StaticPrimitive::new(
                PrimitiveKind::AnalyzeUtilization,
                json!({}),
            )))
            .build_for(&table())
            .err()
            .expect("unresolved");
        assert_eq!(
            err,
            RegistryError::Unresolved {
                class: IncidentClass::LoadSpike,
                primitive: PrimitiveKind::CheckScalingBehavior,
            }
        );
    }

    #[test]
    fn resolves_by_kind_and_name() {
        let registry = RegistryBuilder::new()
            .register(Arc::new(StaticPrimitive::new(
                PrimitiveKind::AnalyzeUtilization,
                json!({"v": 1}),
            )))
            .register(Arc::new(StaticPrimitive::new(
                PrimitiveKind::CheckScalingBehavior,
                json!({}),
            )))
            .build_for(&table())
            .expect("registry");

        assert!(registry.resolve("analyze_utilization").is_ok());
        assert_eq!(
            registry.resolve("analyze_everything").err(),
            Some(RegistryError::UnknownPrimitive("analyze_everything".to_string()))
        );
        assert_eq!(
            registry.get(PrimitiveKind::CompareVersions).err(),
            Some(RegistryError::NotRegistered(PrimitiveKind::CompareVersions))
        );
        assert_eq!(registry.kinds().len(), 2);
    }
}
