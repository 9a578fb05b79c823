//! Classification → Plan.

use uuid::Uuid;

use crate::core::context::SharedContext;
use crate::core::policy::PolicyGate;
use crate::core::strategy::StrategyTable;
use crate::core::types::{Classification, IncidentClass, Plan, PlanStep, PrimitiveKind};
use crate::error::ComposeError;

/// Rough wall-clock cost of one primitive, used for the duration estimate.
pub const SECONDS_PER_STEP: u64 = 3;

/// Builds plans from an injected strategy table, consulting the policy gate
/// once per step.
#[derive(Debug, Clone, Default)]
pub struct PlanComposer {
    strategies: StrategyTable,
    gate: PolicyGate,
}

impl PlanComposer {
    pub fn new(strategies: StrategyTable, gate: PolicyGate) -> Self {
        Self { strategies, gate }
    }

    pub fn strategies(&self) -> &StrategyTable {
        &self.strategies
    }

    pub fn gate(&self) -> &PolicyGate {
        &self.gate
    }

    /// Compose a plan with a fresh `plan-xxxxxxxx` id.
    pub fn compose(&self, classification: &Classification) -> Result<Plan, ComposeError> {
        let plan_id = format!("plan-{}", &Uuid::new_v4().simple().to_string()[..8]);
        self.compose_with_id(classification, plan_id)
    }

    /// Deterministic composition given an id.
    pub fn compose_with_id(
        &self,
        classification: &Classification,
        plan_id: String,
    ) -> Result<Plan, ComposeError> {
        let primitives = self.select_primitives(classification)?;
        let summary = self.summarize(classification, &primitives);
        let steps: Vec<PlanStep> = primitives
            .into_iter()
            .map(|primitive| {
                let risk_level = primitive.risk_level();
                PlanStep {
                    primitive,
                    risk_level,
                    requires_approval: self
                        .gate
                        .requires_approval(risk_level, &classification.scope),
                }
            })
            .collect();

        Ok(Plan {
            plan_id,
            incident_class: classification.primary_class,
            estimated_duration_secs: steps.len() as u64 * SECONDS_PER_STEP,
            steps,
            shared_context: SharedContext::from_classification(classification),
            summary,
        })
    }

    /// Primary strategy verbatim, then unseen primitives from each secondary
    /// class in order.
    pub fn select_primitives(
        &self,
        classification: &Classification,
    ) -> Result<Vec<PrimitiveKind>, ComposeError> {
        let mut selected = Vec::new();
        let classes = std::iter::once(classification.primary_class)
            .chain(classification.secondary_classes.iter().copied());
        for class in classes {
            for primitive in self.strategy_for(class)? {
                if !selected.contains(primitive) {
                    selected.push(*primitive);
                }
            }
        }
        Ok(selected)
    }

    fn summarize(&self, classification: &Classification, primitives: &[PrimitiveKind]) -> String {
        let descriptions: Vec<&str> = std::iter::once(classification.primary_class)
            .chain(classification.secondary_classes.iter().copied())
            .filter_map(|class| self.strategies.get(class))
            .map(|strategy| strategy.description.as_str())
            .collect();
        let order: Vec<&str> = primitives.iter().map(|primitive| primitive.as_str()).collect();
        format!(
            "{} in scope {}. Steps: {}.",
            descriptions.join("; "),
            classification.scope,
            order.join(", ")
        )
    }

    fn strategy_for(&self, class: IncidentClass) -> Result<&[PrimitiveKind], ComposeError> {
        self.strategies
            .get(class)
            .map(|strategy| strategy.primitives.as_slice())
            .ok_or(ComposeError::UnknownIncidentClass(class))
    }
}
