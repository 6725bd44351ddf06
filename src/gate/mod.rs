//! Breakpoint gates: the run's only suspension point.
//!
//! A gate is attached to a phase with a trigger predicate. When it fires after
//! the phase commits, a [`Breakpoint`] carrying a snapshot of the run is handed
//! to a [`DecisionProvider`] and the executor awaits its answer. The gate's
//! policy then decides whether the run resumes or aborts:
//!
//! | Policy     | Approved | Rejected                 |
//! |------------|----------|--------------------------|
//! | `Blocking` | resume   | abort (`gate_rejected`)  |
//! | `Advisory` | resume   | resume, rejection logged |
//!
//! State machine, enforced by [`BreakpointGate`]:
//! `Idle → Triggered → AwaitingDecision → Approved|Rejected → Resumed|Aborted`.

mod auto;
mod channel;
mod prompt;

pub use auto::AutoApprover;
pub use channel::{BreakpointReceiver, ChannelApprover, PendingBreakpoint};
pub use prompt::InteractiveApprover;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use phasegate_common::{Decision, DecisionKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::GateError;
use crate::predicate::Predicate;

/// How a rejection is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatePolicy {
    /// A rejection aborts the run.
    #[default]
    Blocking,
    /// A rejection is recorded; the run continues.
    Advisory,
}

impl std::fmt::Display for GatePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatePolicy::Blocking => write!(f, "blocking"),
            GatePolicy::Advisory => write!(f, "advisory"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    #[default]
    Idle,
    Triggered,
    AwaitingDecision,
    Approved,
    Rejected,
    Resumed,
    Aborted,
}

impl std::fmt::Display for GateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GateState::Idle => "idle",
            GateState::Triggered => "triggered",
            GateState::AwaitingDecision => "awaiting_decision",
            GateState::Approved => "approved",
            GateState::Rejected => "rejected",
            GateState::Resumed => "resumed",
            GateState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Static description of a gate attached to a phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateSpec {
    pub name: String,
    pub title: String,
    pub question: String,
    #[serde(default, rename = "when")]
    pub trigger: Predicate,
    #[serde(default)]
    pub policy: GatePolicy,
}

impl GateSpec {
    /// Unconditional checkpoint: always triggers.
    pub fn checkpoint(name: &str, title: &str, question: &str) -> Self {
        Self {
            name: name.to_string(),
            title: title.to_string(),
            question: question.to_string(),
            trigger: Predicate::Always,
            policy: GatePolicy::Blocking,
        }
    }

    /// Conditional gate: triggers only when `trigger` holds.
    pub fn when(name: &str, title: &str, question: &str, trigger: Predicate) -> Self {
        Self {
            trigger,
            ..Self::checkpoint(name, title, question)
        }
    }

    pub fn advisory(mut self) -> Self {
        self.policy = GatePolicy::Advisory;
        self
    }

    pub fn blocking(mut self) -> Self {
        self.policy = GatePolicy::Blocking;
        self
    }

    pub fn is_unconditional(&self) -> bool {
        self.trigger.is_always()
    }
}

/// A triggered gate awaiting (or holding) an external decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub id: Uuid,
    pub gate: String,
    pub phase: String,
    pub title: String,
    pub question: String,
    pub policy: GatePolicy,
    /// Snapshot view of the run at the moment the gate fired.
    pub context: Value,
    pub state: GateState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    pub triggered_at: DateTime<Utc>,
}

impl Breakpoint {
    pub fn is_pending(&self) -> bool {
        self.decision.is_none()
    }

    pub fn was_rejected(&self) -> bool {
        self.decision
            .as_ref()
            .is_some_and(|d| d.kind == DecisionKind::Rejected)
    }
}

/// What the executor should do after a gate is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Resume,
    Abort,
}

/// Pause/resume state machine for a single firing of a gate.
#[derive(Debug)]
pub struct BreakpointGate {
    spec: GateSpec,
    phase: String,
    state: GateState,
    breakpoint: Option<Breakpoint>,
}

impl BreakpointGate {
    pub fn new(spec: GateSpec, phase: &str) -> Self {
        Self {
            spec,
            phase: phase.to_string(),
            state: GateState::Idle,
            breakpoint: None,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn spec(&self) -> &GateSpec {
        &self.spec
    }

    pub fn breakpoint(&self) -> Option<&Breakpoint> {
        self.breakpoint.as_ref()
    }

    /// `Idle → Triggered → AwaitingDecision`. Returns the breakpoint to present.
    pub fn trigger(&mut self, context: Value) -> Result<Breakpoint, GateError> {
        if self.state != GateState::Idle {
            return Err(self.invalid("trigger"));
        }
        self.state = GateState::Triggered;
        let breakpoint = Breakpoint {
            id: Uuid::new_v4(),
            gate: self.spec.name.clone(),
            phase: self.phase.clone(),
            title: self.spec.title.clone(),
            question: self.spec.question.clone(),
            policy: self.spec.policy,
            context,
            state: GateState::AwaitingDecision,
            decision: None,
            triggered_at: Utc::now(),
        };
        self.state = GateState::AwaitingDecision;
        self.breakpoint = Some(breakpoint.clone());
        Ok(breakpoint)
    }

    /// `AwaitingDecision → Approved|Rejected → Resumed|Aborted`.
    ///
    /// Only a blocking gate with a rejection aborts. A gate resolves once.
    pub fn resolve(&mut self, decision: Decision) -> Result<GateOutcome, GateError> {
        if self.state != GateState::AwaitingDecision {
            return Err(self.invalid("resolve"));
        }
        self.state = match decision.kind {
            DecisionKind::Approved => GateState::Approved,
            DecisionKind::Rejected => GateState::Rejected,
        };

        let outcome = match (self.spec.policy, decision.kind) {
            (GatePolicy::Blocking, DecisionKind::Rejected) => GateOutcome::Abort,
            _ => GateOutcome::Resume,
        };
        self.state = match outcome {
            GateOutcome::Resume => GateState::Resumed,
            GateOutcome::Abort => GateState::Aborted,
        };

        if let Some(breakpoint) = self.breakpoint.as_mut() {
            breakpoint.decision = Some(decision);
            breakpoint.state = self.state;
        }
        Ok(outcome)
    }

    /// Consume the gate, returning the resolved breakpoint record.
    pub fn into_breakpoint(self) -> Option<Breakpoint> {
        self.breakpoint
    }

    fn invalid(&self, action: &'static str) -> GateError {
        GateError::InvalidTransition {
            gate: self.spec.name.clone(),
            from: self.state,
            action,
        }
    }
}

/// External actor that answers breakpoint questions.
///
/// Implementations own the human or automated channel. The executor awaits
/// `present` without any timeout of its own; a provider that never answers
/// keeps the run suspended.
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    async fn present(&self, breakpoint: &Breakpoint) -> Result<Decision>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gate(policy: GatePolicy) -> BreakpointGate {
        let mut spec = GateSpec::checkpoint("review", "Review", "Proceed?");
        spec.policy = policy;
        BreakpointGate::new(spec, "scan")
    }

    #[test]
    fn trigger_moves_to_awaiting_decision() {
        let mut g = gate(GatePolicy::Blocking);
        assert_eq!(g.state(), GateState::Idle);
        let bp = g.trigger(json!({"errors": 0})).unwrap();
        assert_eq!(g.state(), GateState::AwaitingDecision);
        assert_eq!(bp.state, GateState::AwaitingDecision);
        assert!(bp.is_pending());
        assert_eq!(bp.phase, "scan");
    }

    #[test]
    fn blocking_rejection_aborts() {
        let mut g = gate(GatePolicy::Blocking);
        g.trigger(Value::Null).unwrap();
        let outcome = g.resolve(Decision::rejected()).unwrap();
        assert_eq!(outcome, GateOutcome::Abort);
        assert_eq!(g.state(), GateState::Aborted);
        assert!(g.breakpoint().unwrap().was_rejected());
    }

    #[test]
    fn blocking_approval_resumes() {
        let mut g = gate(GatePolicy::Blocking);
        g.trigger(Value::Null).unwrap();
        assert_eq!(g.resolve(Decision::approved()).unwrap(), GateOutcome::Resume);
        assert_eq!(g.state(), GateState::Resumed);
    }

    #[test]
    fn advisory_rejection_resumes_but_is_recorded() {
        let mut g = gate(GatePolicy::Advisory);
        g.trigger(Value::Null).unwrap();
        let outcome = g
            .resolve(Decision::rejected().with_notes("budget too thin"))
            .unwrap();
        assert_eq!(outcome, GateOutcome::Resume);
        let bp = g.into_breakpoint().unwrap();
        assert!(bp.was_rejected());
        assert_eq!(bp.state, GateState::Resumed);
        assert_eq!(bp.decision.unwrap().notes.as_deref(), Some("budget too thin"));
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let mut g = gate(GatePolicy::Blocking);
        assert!(matches!(
            g.resolve(Decision::approved()),
            Err(GateError::InvalidTransition { action: "resolve", .. })
        ));
        g.trigger(Value::Null).unwrap();
        assert!(g.trigger(Value::Null).is_err());
        g.resolve(Decision::approved()).unwrap();
        assert!(g.resolve(Decision::rejected()).is_err());
    }

    #[test]
    fn gate_spec_deserializes_with_when_key() {
        let spec: GateSpec = serde_json::from_value(json!({
            "name": "budget",
            "title": "Error budget",
            "question": "Budget low, continue?",
            "policy": "advisory",
            "when": {"kind": "compare", "path": "/score/total", "op": "lt", "value": 80}
        }))
        .unwrap();
        assert_eq!(spec.policy, GatePolicy::Advisory);
        assert!(!spec.is_unconditional());
    }
}
