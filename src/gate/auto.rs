use anyhow::Result;
use async_trait::async_trait;
use phasegate_common::{Decision, DecisionKind};
use std::collections::HashMap;

use super::{Breakpoint, DecisionProvider};

/// Policy-driven decision provider for unattended runs.
///
/// Answers every breakpoint with a default decision, unless a per-gate
/// override names the gate. This is what `--yes` / `--reject-all` use.
#[derive(Debug, Clone)]
pub struct AutoApprover {
    default: DecisionKind,
    overrides: HashMap<String, DecisionKind>,
    actor: String,
}

impl AutoApprover {
    pub fn approve_all() -> Self {
        Self::new(DecisionKind::Approved)
    }

    pub fn reject_all() -> Self {
        Self::new(DecisionKind::Rejected)
    }

    pub fn new(default: DecisionKind) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
            actor: "auto".to_string(),
        }
    }

    /// Answer breakpoints from `gate` with `kind` instead of the default.
    pub fn with_override(mut self, gate: &str, kind: DecisionKind) -> Self {
        self.overrides.insert(gate.to_string(), kind);
        self
    }

    pub fn with_actor(mut self, actor: &str) -> Self {
        self.actor = actor.to_string();
        self
    }

    pub fn decision_for(&self, gate: &str) -> DecisionKind {
        self.overrides.get(gate).copied().unwrap_or(self.default)
    }
}

#[async_trait]
impl DecisionProvider for AutoApprover {
    async fn present(&self, breakpoint: &Breakpoint) -> Result<Decision> {
        let kind = self.decision_for(&breakpoint.gate);
        tracing::info!(gate = %breakpoint.gate, phase = %breakpoint.phase, decision = %kind, "auto-decided breakpoint");
        Ok(Decision::new(kind)
            .decided_by(self.actor.clone())
            .with_notes(format!("auto-{} by policy", kind)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{BreakpointGate, GateSpec};
    use serde_json::Value;

    #[tokio::test]
    async fn overrides_take_precedence() {
        let approver =
            AutoApprover::approve_all().with_override("security", DecisionKind::Rejected);

        let mut sec = BreakpointGate::new(GateSpec::checkpoint("security", "S", "?"), "scan");
        let bp = sec.trigger(Value::Null).unwrap();
        assert_eq!(approver.present(&bp).await.unwrap().kind, DecisionKind::Rejected);

        let mut other = BreakpointGate::new(GateSpec::checkpoint("cost", "C", "?"), "plan");
        let bp = other.trigger(Value::Null).unwrap();
        let decision = approver.present(&bp).await.unwrap();
        assert!(decision.is_approved());
        assert_eq!(decision.decided_by.as_deref(), Some("auto"));
    }
}
