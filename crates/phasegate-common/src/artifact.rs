use serde::{Deserialize, Serialize};

/// An output record emitted by a unit of work.
///
/// The engine never interprets an artifact; it only accumulates and forwards
/// it. When `content` is `None` the `path` is the reference to the artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: String,
    pub format: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Artifact {
    /// Create an artifact that refers to `path`.
    pub fn reference(path: &str, format: &str, label: &str) -> Self {
        Self {
            path: path.to_string(),
            format: format.to_string(),
            label: label.to_string(),
            content: None,
        }
    }

    /// Create an artifact carrying its content inline.
    pub fn inline(path: &str, format: &str, label: &str, content: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            format: format.to_string(),
            label: label.to_string(),
            content: Some(content.into()),
        }
    }

    pub fn is_inline(&self) -> bool {
        self.content.is_some()
    }
}
