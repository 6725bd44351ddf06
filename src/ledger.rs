use phasegate_common::Artifact;

/// Append-only collection of artifacts emitted during a run, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct ArtifactLedger {
    artifacts: Vec<Artifact>,
}

impl ArtifactLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, artifact: Artifact) {
        self.artifacts.push(artifact);
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn into_vec(self) -> Vec<Artifact> {
        self.artifacts
    }
}
