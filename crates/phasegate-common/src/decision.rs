use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Approved,
    Rejected,
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionKind::Approved => write!(f, "approved"),
            DecisionKind::Rejected => write!(f, "rejected"),
        }
    }
}

/// An external actor's answer to a breakpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub kind: DecisionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl Decision {
    pub fn approved() -> Self {
        Self::new(DecisionKind::Approved)
    }

    pub fn rejected() -> Self {
        Self::new(DecisionKind::Rejected)
    }

    pub fn new(kind: DecisionKind) -> Self {
        Self {
            kind,
            notes: None,
            decided_by: None,
            decided_at: Utc::now(),
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn decided_by(mut self, actor: impl Into<String>) -> Self {
        self.decided_by = Some(actor.into());
        self
    }

    pub fn is_approved(&self) -> bool {
        self.kind == DecisionKind::Approved
    }
}
