//! Typed error hierarchy for the phasegate engine.
//!
//! Three enums cover the three places a caller can get a hard error:
//! - `DefinitionError`: a process definition failed static validation
//! - `GateError`: an illegal breakpoint state transition
//! - `InvokerError`: command invoker internals, mapped to unit failures
//!
//! Workflow-level failures (a unit failing, a gate being rejected) are not
//! errors: they are recorded in the run state and surface in the outcome.

use thiserror::Error;

use crate::gate::GateState;

/// Static validation failures for a `ProcessDefinition`.
#[derive(Debug, Error, PartialEq)]
pub enum DefinitionError {
    #[error("Phase '{phase}' is defined more than once")]
    DuplicatePhase { phase: String },

    #[error("Phase '{phase}' declares unit '{unit}' more than once")]
    DuplicateUnit { phase: String, unit: String },

    #[error("Phase '{phase}' declares gate '{gate}' more than once")]
    DuplicateGate { phase: String, gate: String },

    #[error("Fan-out phase '{phase}' has no units")]
    EmptyFanOut { phase: String },

    #[error("Phase '{phase}' scores component '{component}' which has no weight")]
    UnknownScoreComponent { phase: String, component: String },

    #[error("Phase '{phase}' references phase '{referenced}' which does not run before it")]
    ForwardReference { phase: String, referenced: String },

    #[error("Phase '{phase}' references unknown phase '{referenced}'")]
    UnknownPhase { phase: String, referenced: String },

    #[error("Phase '{phase}' uses invalid JSON pointer '{pointer}'")]
    InvalidPointer { phase: String, pointer: String },

    #[error("Phase name must not be empty")]
    EmptyPhaseName,
}

impl DefinitionError {
    /// Phase the error was found in, if any.
    pub fn phase(&self) -> Option<&str> {
        match self {
            DefinitionError::DuplicatePhase { phase }
            | DefinitionError::DuplicateUnit { phase, .. }
            | DefinitionError::DuplicateGate { phase, .. }
            | DefinitionError::EmptyFanOut { phase }
            | DefinitionError::UnknownScoreComponent { phase, .. }
            | DefinitionError::ForwardReference { phase, .. }
            | DefinitionError::UnknownPhase { phase, .. }
            | DefinitionError::InvalidPointer { phase, .. } => Some(phase),
            DefinitionError::EmptyPhaseName => None,
        }
    }
}

/// Illegal transitions of the breakpoint state machine.
#[derive(Debug, Error, PartialEq)]
pub enum GateError {
    #[error("Gate '{gate}' cannot {action} from state {from}")]
    InvalidTransition {
        gate: String,
        from: GateState,
        action: &'static str,
    },
}

/// Errors from the command-backed task invoker.
#[derive(Debug, Error)]
pub enum InvokerError {
    #[error("Failed to spawn '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write unit request to stdin: {0}")]
    StdinWrite(#[source] std::io::Error),

    #[error("Failed to wait for unit process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Unit timed out after {secs} seconds")]
    Timeout { secs: u64 },

    #[error("Unit process exited with code {exit_code}: {stderr}")]
    NonZeroExit { exit_code: i32, stderr: String },

    #[error("Unit process produced invalid JSON: {0}")]
    InvalidOutput(#[source] serde_json::Error),

    #[error("Failed to serialize unit request: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl InvokerError {
    /// Failure kind this error maps to at the invoker boundary.
    pub fn failure_kind(&self) -> phasegate_common::FailureKind {
        match self {
            InvokerError::InvalidOutput(_) => phasegate_common::FailureKind::ValidationFailure,
            _ => phasegate_common::FailureKind::ExecutionFailure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phasegate_common::FailureKind;

    #[test]
    fn definition_error_forward_reference_names_both_phases() {
        let err = DefinitionError::ForwardReference {
            phase: "configure".into(),
            referenced: "verify".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("configure"));
        assert!(msg.contains("verify"));
    }

    #[test]
    fn gate_error_reports_state_and_action() {
        let err = GateError::InvalidTransition {
            gate: "security-review".into(),
            from: GateState::Idle,
            action: "resolve",
        };
        assert_eq!(
            err.to_string(),
            "Gate 'security-review' cannot resolve from state idle"
        );
    }

    #[test]
    fn invoker_error_spawn_failed_is_matchable() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "agent not found");
        let err = InvokerError::SpawnFailed {
            command: "agent".into(),
            source: io_err,
        };
        match &err {
            InvokerError::SpawnFailed { source, .. } => {
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            _ => panic!("Expected SpawnFailed variant"),
        }
        assert_eq!(err.failure_kind(), FailureKind::ExecutionFailure);
    }

    #[test]
    fn invalid_output_maps_to_validation_failure() {
        let parse_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err = InvokerError::InvalidOutput(parse_err);
        assert_eq!(err.failure_kind(), FailureKind::ValidationFailure);
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&DefinitionError::EmptyPhaseName);
        assert_std_error(&InvokerError::Timeout { secs: 5 });
        assert_std_error(&GateError::InvalidTransition {
            gate: "g".into(),
            from: GateState::Resumed,
            action: "trigger",
        });
    }
}
