//! Incident class → primitive strategy table.
//!
//! This is the only place incident semantics touch primitive selection. The
//! table is an explicit value injected into the composer so tests and callers
//! can supply their own.

use std::collections::{BTreeMap, BTreeSet};

use crate::core::types::{IncidentClass, PrimitiveKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Strategy {
    pub description: String,
    /// Ordered primitive list for the class.
    pub primitives: Vec<PrimitiveKind>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyTable {
    entries: BTreeMap<IncidentClass, Strategy>,
}

impl StrategyTable {
    /// An empty table. Every class must be added explicitly.
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn with_strategy(
        mut self,
        class: IncidentClass,
        description: &str,
        primitives: &[PrimitiveKind],
    ) -> Self {
        self.entries.insert(
            class,
            Strategy {
                description: description.to_string(),
                primitives: primitives.to_vec(),
            },
        );
        self
    }

    pub fn get(&self, class: IncidentClass) -> Option<&Strategy> {
        self.entries.get(&class)
    }

    pub fn iter(&self) -> impl Iterator<Item = (IncidentClass, &Strategy)> {
        self.entries.iter().map(|(class, strategy)| (*class, strategy))
    }

    /// Every primitive referenced by any strategy.
    pub fn referenced_primitives(&self) -> BTreeSet<PrimitiveKind> {
        self.entries
            .values()
            .flat_map(|strategy| strategy.primitives.iter().copied())
            .collect()
    }
}

impl Default for StrategyTable {
    fn default() -> Self {
        use IncidentClass as C;
        use PrimitiveKind as P;

        Self::empty()
            .with_strategy(
                C::ResourceSaturation,
                "Resource exhaustion investigation",
                &[
                    P::AnalyzeUtilization,
                    P::CompareBaseline,
                    P::FindTopConsumers,
                    P::CheckScalingBehavior,
                    P::CheckRecentChanges,
                ],
            )
            .with_strategy(
                C::LoadSpike,
                "Load spike investigation",
                &[
                    P::AnalyzeUtilization,
                    P::CompareBaseline,
                    P::CheckScalingBehavior,
                    P::FindTopConsumers,
                    P::TraceDependencies,
                ],
            )
            .with_strategy(
                C::ConfigurationDrift,
                "Configuration drift investigation",
                &[
                    P::CheckRecentChanges,
                    P::DiffConfiguration,
                    P::ValidateConfiguration,
                    P::CheckDeploymentStatus,
                ],
            )
            .with_strategy(
                C::DependencyFailure,
                "Dependency failure investigation",
                &[
                    P::TraceDependencies,
                    P::CheckConnectivity,
                    P::CheckDependencyHealth,
                    P::CheckRecentChanges,
                    P::EvaluateThrottling,
                ],
            )
            .with_strategy(
                C::ScalingFailure,
                "Scaling failure investigation",
                &[
                    P::CheckScalingBehavior,
                    P::AnalyzeUtilization,
                    P::CheckScalingLimits,
                    P::CheckRecentChanges,
                    P::CheckPermissions,
                ],
            )
            .with_strategy(
                C::NetworkConnectivity,
                "Network connectivity investigation",
                &[
                    P::TraceDependencies,
                    P::CheckConnectivity,
                    P::CheckSecurityGroups,
                    P::CheckNetworkAcls,
                ],
            )
            .with_strategy(
                C::PermissionFailure,
                "Permission failure investigation",
                &[
                    P::CheckPermissions,
                    P::DiffConfiguration,
                    P::CheckRecentChanges,
                ],
            )
            .with_strategy(
                C::CostAnomaly,
                "Cost anomaly investigation",
                &[
                    P::AnalyzeCostTrend,
                    P::CompareBaseline,
                    P::FindTopConsumers,
                    P::CheckRecentChanges,
                    P::AnalyzeUtilization,
                ],
            )
            .with_strategy(
                C::DeploymentRegression,
                "Deployment regression investigation",
                &[
                    P::CheckDeploymentStatus,
                    P::CompareVersions,
                    P::AnalyzeErrorRate,
                    P::CheckRecentChanges,
                    P::AnalyzeUtilization,
                ],
            )
            .with_strategy(
                C::AvailabilityLoss,
                "Availability loss investigation",
                &[
                    P::CheckResourceStatus,
                    P::CheckHealthChecks,
                    P::TraceDependencies,
                    P::CheckRecentChanges,
                    P::AnalyzeErrorRate,
                ],
            )
            .with_strategy(
                C::PerformanceDegradation,
                "Performance degradation investigation",
                &[
                    P::AnalyzeLatency,
                    P::CompareBaseline,
                    P::TraceDependencies,
                    P::AnalyzeQueryPerformance,
                    P::CheckRecentChanges,
                ],
            )
            .with_strategy(
                C::DataInconsistency,
                "Data inconsistency investigation",
                &[
                    P::CheckReplicationLag,
                    P::CheckRecentChanges,
                    P::AnalyzeErrorRate,
                ],
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_covers_every_class_with_three_to_six_primitives() {
        let table = StrategyTable::default();
        for class in IncidentClass::ALL {
            let strategy = table.get(class).expect("strategy for every class");
            let len = strategy.primitives.len();
            assert!((3..=6).contains(&len), "{class} has {len} primitives");
        }
    }

    #[test]
    fn default_strategies_have_no_duplicate_primitives() {
        for (class, strategy) in StrategyTable::default().iter() {
            let unique: BTreeSet<_> = strategy.primitives.iter().collect();
            assert_eq!(unique.len(), strategy.primitives.len(), "{class}");
        }
    }

    #[test]
    fn default_table_references_every_primitive_kind() {
        let referenced = StrategyTable::default().referenced_primitives();
        for kind in PrimitiveKind::ALL {
            assert!(referenced.contains(&kind), "{kind} is never planned");
        }
    }

    #[test]
    fn resource_saturation_checks_utilization_before_changes() {
        let table = StrategyTable::default();
        let prims = &table
            .get(IncidentClass::ResourceSaturation)
            .expect("strategy")
            .primitives;
        let util = prims.iter().position(|p| *p == PrimitiveKind::AnalyzeUtilization);
        let changes = prims.iter().position(|p| *p == PrimitiveKind::CheckRecentChanges);
        assert!(util < changes);
    }
}
