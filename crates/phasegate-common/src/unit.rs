use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::artifact::Artifact;

/// Why a unit of work (or a whole run) failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Unit input or output did not match its declared shape.
    ValidationFailure,
    /// The collaborator reported a failure while executing the unit.
    ExecutionFailure,
    /// The run was cancelled before the unit could be dispatched.
    Cancelled,
    /// A blocking breakpoint was rejected.
    GateRejected,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ValidationFailure => "validation_failure",
            FailureKind::ExecutionFailure => "execution_failure",
            FailureKind::Cancelled => "cancelled",
            FailureKind::GateRejected => "gate_rejected",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successful output of a unit: the typed payload plus any artifacts it emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitOutput {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
}

impl UnitOutput {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl std::fmt::Display for UnitFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Result of a single unit of work. The tag decides phase-level failure handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UnitResult {
    Success(UnitOutput),
    Failure(UnitFailure),
}

impl UnitResult {
    /// Successful result with no artifacts.
    pub fn success(value: Value) -> Self {
        UnitResult::Success(UnitOutput::new(value))
    }

    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        UnitResult::Failure(UnitFailure {
            kind,
            message: message.into(),
        })
    }

    pub fn execution_failure(message: impl Into<String>) -> Self {
        Self::failure(FailureKind::ExecutionFailure, message)
    }

    pub fn validation_failure(message: impl Into<String>) -> Self {
        Self::failure(FailureKind::ValidationFailure, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::failure(FailureKind::Cancelled, message)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UnitResult::Success(_))
    }

    pub fn output(&self) -> Option<&UnitOutput> {
        match self {
            UnitResult::Success(output) => Some(output),
            UnitResult::Failure(_) => None,
        }
    }

    pub fn failure_info(&self) -> Option<&UnitFailure> {
        match self {
            UnitResult::Success(_) => None,
            UnitResult::Failure(failure) => Some(failure),
        }
    }
}
