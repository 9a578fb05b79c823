//! Approval policy for plan steps.

use std::collections::BTreeSet;

use crate::core::types::RiskLevel;

/// Decides whether a step needs human approval. Read-only after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyGate {
    approval_required: BTreeSet<RiskLevel>,
    protected_scopes: BTreeSet<String>,
}

impl PolicyGate {
    pub fn new(
        approval_required: impl IntoIterator<Item = RiskLevel>,
        protected_scopes: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            approval_required: approval_required.into_iter().collect(),
            protected_scopes: protected_scopes
                .into_iter()
                .map(|scope| scope.trim().to_ascii_lowercase())
                .collect(),
        }
    }

    /// A step requires approval if its risk level is in the approval set, or
    /// if it targets a protected scope and is not a read.
    pub fn requires_approval(&self, risk: RiskLevel, scope: &str) -> bool {
        if self.approval_required.contains(&risk) {
            return true;
        }
        self.is_protected(scope) && risk != RiskLevel::Read
    }

    pub fn is_protected(&self, scope: &str) -> bool {
        self.protected_scopes
            .contains(&scope.trim().to_ascii_lowercase())
    }
}

impl Default for PolicyGate {
    fn default() -> Self {
        Self::new(
            [RiskLevel::Write, RiskLevel::Delete],
            ["prod".to_string(), "production".to_string()],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Gate with no approval-set entries, so only the scope rule applies.
    fn scope_only_gate() -> PolicyGate {
        PolicyGate::new([], ["prod".to_string()])
    }

    #[test]
    fn write_in_prod_requires_approval() {
        assert!(scope_only_gate().requires_approval(RiskLevel::Write, "prod"));
    }

    #[test]
    fn read_in_prod_does_not_require_approval() {
        assert!(!scope_only_gate().requires_approval(RiskLevel::Read, "prod"));
    }

    #[test]
    fn write_outside_protected_scope_is_unattended() {
        assert!(!scope_only_gate().requires_approval(RiskLevel::Write, "dev"));
    }

    #[test]
    fn approval_set_applies_in_every_scope() {
        let gate = PolicyGate::default();
        assert!(gate.requires_approval(RiskLevel::Delete, "dev"));
        assert!(gate.requires_approval(RiskLevel::Write, "staging"));
        assert!(!gate.requires_approval(RiskLevel::Read, "production"));
    }

    #[test]
    fn explicit_read_entry_overrides_scope_rule() {
        let gate = PolicyGate::new([RiskLevel::Read], ["prod".to_string()]);
        assert!(gate.requires_approval(RiskLevel::Read, "dev"));
    }

    #[test]
    fn scope_match_ignores_case() {
        assert!(scope_only_gate().requires_approval(RiskLevel::Write, "PROD"));
    }
}
