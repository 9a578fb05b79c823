//! Scaling-group primitives.

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;

use crate::core::context::SharedContext;
use crate::core::types::{Facts, PrimitiveKind};
use crate::io::cloud::{CloudApi, ResourceTarget, ScalingConfig};

use super::{Primitive, to_facts};

const LISTED_ACTIVITIES: usize = 5;

fn describe(cloud: &dyn CloudApi, context: &SharedContext) -> Result<ScalingConfig> {
    cloud.describe_scaling_config(&ResourceTarget::from_context(context))
}

fn at_max(config: &ScalingConfig) -> bool {
    config.enabled && config.current_capacity >= config.max_capacity
}

pub struct ScalingBehavior {
    cloud: Arc<dyn CloudApi>,
}

impl ScalingBehavior {
    pub fn new(cloud: Arc<dyn CloudApi>) -> Self {
        Self { cloud }
    }
}

impl Primitive for ScalingBehavior {
    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::CheckScalingBehavior
    }

    fn execute(&self, context: &SharedContext) -> Result<Facts> {
        let config = describe(self.cloud.as_ref(), context)?;
        let facts = json!({
            "scaling_enabled": config.enabled,
            "group_name": config.group_name,
            "min_capacity": config.min_capacity,
            "max_capacity": config.max_capacity,
            "desired_capacity": config.desired_capacity,
            "current_capacity": config.current_capacity,
            "at_max_capacity": at_max(&config),
            "activity_count": config.activities.len(),
            "recent_activities": config.activities.iter().take(LISTED_ACTIVITIES).collect::<Vec<_>>(),
        });
        to_facts(&facts)
    }
}

pub struct ScalingLimits {
    cloud: Arc<dyn CloudApi>,
}

impl ScalingLimits {
    pub fn new(cloud: Arc<dyn CloudApi>) -> Self {
        Self { cloud }
    }
}

impl Primitive for ScalingLimits {
    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::CheckScalingLimits
    }

    fn execute(&self, context: &SharedContext) -> Result<Facts> {
        let config = describe(self.cloud.as_ref(), context)?;
        let utilization = (config.max_capacity > 0)
            .then(|| f64::from(config.current_capacity) / f64::from(config.max_capacity) * 100.0);
        let facts = json!({
            "scaling_enabled": config.enabled,
            "headroom": config.max_capacity.saturating_sub(config.current_capacity),
            "at_max": at_max(&config),
            "at_min": config.enabled && config.current_capacity <= config.min_capacity,
            "capacity_used_percent": utilization.map(|v| (v * 10.0).round() / 10.0),
        });
        to_facts(&facts)
    }
}

/// Structural checks on the scaling configuration.
pub struct ConfigurationValidation {
    cloud: Arc<dyn CloudApi>,
}

impl ConfigurationValidation {
    pub fn new(cloud: Arc<dyn CloudApi>) -> Self {
        Self { cloud }
    }
}

/// `min <= desired <= max` and a non-zero maximum.
pub fn scaling_violations(config: &ScalingConfig) -> Vec<String> {
    if !config.enabled {
        return Vec::new();
    }
    let mut violations = Vec::new();
    if config.max_capacity == 0 {
        violations.push("max_capacity is 0".to_string());
    }
    if config.min_capacity > config.max_capacity {
        violations.push(format!(
            "min_capacity {} exceeds max_capacity {}",
            config.min_capacity, config.max_capacity
        ));
    }
    if config.desired_capacity < config.min_capacity || config.desired_capacity > config.max_capacity {
        violations.push(format!(
            "desired_capacity {} outside [{}, {}]",
            config.desired_capacity, config.min_capacity, config.max_capacity
        ));
    }
    violations
}

impl Primitive for ConfigurationValidation {
    fn kind(&self) -> PrimitiveKind {
        PrimitiveKind::ValidateConfiguration
    }

    fn execute(&self, context: &SharedContext) -> Result<Facts> {
        let config = describe(self.cloud.as_ref(), context)?;
        let violations = scaling_violations(&config);
        let facts = json!({
            "scaling_enabled": config.enabled,
            "group_name": config.group_name,
            "valid": violations.is_empty(),
            "violations": violations,
        });
        to_facts(&facts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::fixtures::FixtureCloud;
    use crate::test_support::{context_for, failing_cloud};

    #[test]
    fn behavior_reports_capacity_and_activities() {
        let facts = ScalingBehavior::new(Arc::new(FixtureCloud))
            .execute(&context_for(Some("ec2"), None))
            .expect("facts");
        assert_eq!(facts["group_name"], json!("web-asg"));
        assert_eq!(facts["at_max_capacity"], json!(true));
        assert_eq!(facts["activity_count"], json!(2));
    }

    #[test]
    fn limits_report_headroom() {
        let facts = ScalingLimits::new(Arc::new(FixtureCloud))
            .execute(&context_for(Some("ec2"), None))
            .expect("facts");
        assert_eq!(facts["headroom"], json!(0));
        assert_eq!(facts["at_max"], json!(true));
        assert_eq!(facts["at_min"], json!(false));
        assert_eq!(facts["capacity_used_percent"], json!(100.0));
    }

    #[test]
    fn violations_cover_bounds() {
        let mut config = ScalingConfig {
            enabled: true,
            group_name: None,
            min_capacity: 4,
            max_capacity: 2,
            desired_capacity: 3,
            current_capacity: 2,
            activities: Vec::new(),
        };
        assert_eq!(scaling_violations(&config).len(), 2);
        config.max_capacity = 0;
        config.min_capacity = 0;
        config.desired_capacity = 0;
        assert_eq!(scaling_violations(&config), vec!["max_capacity is 0".to_string()]);
        assert!(scaling_violations(&ScalingConfig::disabled()).is_empty());
    }

    #[test]
    fn fixture_configuration_is_valid() {
        let facts = ConfigurationValidation::new(Arc::new(FixtureCloud))
            .execute(&context_for(None, None))
            .expect("facts");
        assert_eq!(facts["valid"], json!(true));
    }

    #[test]
    fn provider_errors_propagate() {
        assert!(ScalingLimits::new(failing_cloud()).execute(&context_for(None, None)).is_err());
    }
}
