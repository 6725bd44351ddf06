//! Run state: the append-only record of one workflow execution.
//!
//! `RunState` has exactly one writer, the `PhaseExecutor`; every mutator is
//! crate-private. Everything else (activation predicates, gates, unit input
//! bindings, reports) reads an owned `RunSnapshot` taken after a phase has been
//! committed, so readers never race the writer.

use phasegate_common::{Artifact, FailureKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::gate::Breakpoint;
use crate::ledger::ArtifactLedger;
use crate::score::{ScoreAggregator, ScoreComponent};

/// Final status of a phase within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// Units ran and the phase output was merged.
    Completed,
    /// The activation predicate was false.
    Skipped,
    /// An optional phase failed; the run continued.
    Failed,
    /// A required phase failed; the run stopped here.
    Aborted,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Completed => "completed",
            PhaseStatus::Skipped => "skipped",
            PhaseStatus::Failed => "failed",
            PhaseStatus::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: String,
    pub status: PhaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default)]
    pub units: usize,
    #[serde(default)]
    pub failed_units: usize,
    #[serde(default)]
    pub duration_ms: u64,
}

impl PhaseRecord {
    pub fn skipped(phase: &str) -> Self {
        Self {
            phase: phase.to_string(),
            status: PhaseStatus::Skipped,
            output: None,
            units: 0,
            failed_units: 0,
            duration_ms: 0,
        }
    }
}

/// A failure recorded during the run. Fatal entries ended the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedError {
    pub phase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub kind: FailureKind,
    pub message: String,
    pub fatal: bool,
}

impl RecordedError {
    pub fn warning(phase: &str, unit: Option<&str>, kind: FailureKind, message: &str) -> Self {
        Self {
            phase: phase.to_string(),
            unit: unit.map(str::to_string),
            kind,
            message: message.to_string(),
            fatal: false,
        }
    }

    pub fn fatal(phase: &str, unit: Option<&str>, kind: FailureKind, message: &str) -> Self {
        Self {
            fatal: true,
            ..Self::warning(phase, unit, kind, message)
        }
    }
}

/// Immutable, owned copy of the run state at a commit point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub input: Value,
    pub phases: Vec<PhaseRecord>,
    pub artifacts: Vec<Artifact>,
    pub score_components: Vec<ScoreComponent>,
    pub errors: Vec<RecordedError>,
    pub breakpoints: Vec<Breakpoint>,
}

impl RunSnapshot {
    pub fn phase(&self, name: &str) -> Option<&PhaseRecord> {
        self.phases.iter().find(|r| r.phase == name)
    }

    /// Merged output of a completed (or partially successful) phase.
    pub fn output(&self, name: &str) -> Option<&Value> {
        self.phase(name).and_then(|r| r.output.as_ref())
    }

    pub fn has_phase(&self, name: &str) -> bool {
        self.phase(name).is_some()
    }

    /// Running Σ weight·value over the components registered so far (unclamped).
    pub fn score_total(&self) -> f64 {
        self.score_components
            .iter()
            .map(|c| c.weight * c.value)
            .sum()
    }

    /// JSON view that predicates and unit bindings address with JSON pointers.
    ///
    /// ```text
    /// /input/...                  initial input
    /// /phases/<name>/status       completed | skipped | failed | aborted
    /// /phases/<name>/output/...   merged phase output
    /// /score/total                running weighted total
    /// /score/components/<name>    latest value of a component
    /// /artifacts, /errors         counts
    /// ```
    pub fn view(&self) -> Value {
        let mut phases = Map::new();
        for record in &self.phases {
            let mut entry = Map::new();
            entry.insert("status".into(), json!(record.status.as_str()));
            if let Some(output) = &record.output {
                entry.insert("output".into(), output.clone());
            }
            phases.insert(record.phase.clone(), Value::Object(entry));
        }

        let mut components = Map::new();
        for component in &self.score_components {
            components.insert(component.name.clone(), json!(component.value));
        }

        json!({
            "input": self.input,
            "phases": phases,
            "score": {
                "total": self.score_total(),
                "components": components,
            },
            "artifacts": self.artifacts.len(),
            "errors": self.errors.len(),
        })
    }

    /// Context handed to a breakpoint: the [`RunSnapshot::view`] with
    /// `/artifacts` and `/errors` expanded to the full lists.
    pub fn gate_context(&self) -> Value {
        let mut context = self.view();
        context["artifacts"] = serde_json::to_value(&self.artifacts).unwrap_or_default();
        context["errors"] = serde_json::to_value(&self.errors).unwrap_or_default();
        context
    }

    /// Resolve a JSON pointer against [`RunSnapshot::view`].
    pub fn lookup(&self, pointer: &str) -> Option<Value> {
        self.view().pointer(pointer).cloned()
    }
}

/// The live, single-writer run state.
#[derive(Debug, Default)]
pub struct RunState {
    input: Value,
    records: Vec<PhaseRecord>,
    ledger: ArtifactLedger,
    scores: ScoreAggregator,
    errors: Vec<RecordedError>,
    breakpoints: Vec<Breakpoint>,
}

impl RunState {
    pub fn new(input: Value) -> Self {
        Self {
            input,
            ..Self::default()
        }
    }

    pub fn input(&self) -> &Value {
        &self.input
    }

    pub fn records(&self) -> &[PhaseRecord] {
        &self.records
    }

    pub fn ledger(&self) -> &ArtifactLedger {
        &self.ledger
    }

    pub fn scores(&self) -> &ScoreAggregator {
        &self.scores
    }

    pub fn errors(&self) -> &[RecordedError] {
        &self.errors
    }

    pub fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            input: self.input.clone(),
            phases: self.records.clone(),
            artifacts: self.ledger.artifacts().to_vec(),
            score_components: self.scores.components().to_vec(),
            errors: self.errors.clone(),
            breakpoints: self.breakpoints.clone(),
        }
    }

    pub(crate) fn record_phase(&mut self, record: PhaseRecord) {
        self.records.push(record);
    }

    pub(crate) fn append_artifacts(&mut self, artifacts: impl IntoIterator<Item = Artifact>) {
        for artifact in artifacts {
            self.ledger.append(artifact);
        }
    }

    pub(crate) fn add_score(&mut self, name: &str, weight: f64, value: f64) {
        self.scores.add_component(name, weight, value);
    }

    pub(crate) fn record_error(&mut self, error: RecordedError) {
        self.errors.push(error);
    }

    pub(crate) fn record_breakpoint(&mut self, breakpoint: Breakpoint) {
        self.breakpoints.push(breakpoint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(phase: &str, output: Value) -> PhaseRecord {
        PhaseRecord {
            phase: phase.to_string(),
            status: PhaseStatus::Completed,
            output: Some(output),
            units: 1,
            failed_units: 0,
            duration_ms: 3,
        }
    }

    #[test]
    fn view_exposes_input_phases_and_score() {
        let mut state = RunState::new(json!({"infra": "kubernetes"}));
        state.record_phase(completed("analyze", json!({"pods": 12})));
        state.record_phase(PhaseRecord::skipped("vpa"));
        state.add_score("readiness", 0.5, 80.0);

        let snapshot = state.snapshot();
        assert_eq!(snapshot.lookup("/input/infra"), Some(json!("kubernetes")));
        assert_eq!(snapshot.lookup("/phases/analyze/output/pods"), Some(json!(12)));
        assert_eq!(snapshot.lookup("/phases/vpa/status"), Some(json!("skipped")));
        assert_eq!(snapshot.lookup("/phases/vpa/output"), None);
        assert_eq!(snapshot.lookup("/score/total"), Some(json!(40.0)));
        assert_eq!(snapshot.lookup("/score/components/readiness"), Some(json!(80.0)));
    }

    #[test]
    fn gate_context_lists_artifacts_and_errors() {
        let mut state = RunState::new(Value::Null);
        state.record_phase(completed("render", json!({})));
        state.append_artifacts([Artifact::reference("hpa.yaml", "yaml", "HPA manifest")]);
        state.record_error(RecordedError::warning(
            "render",
            Some("vpa"),
            FailureKind::ExecutionFailure,
            "boom",
        ));

        let snapshot = state.snapshot();
        assert_eq!(snapshot.lookup("/artifacts"), Some(json!(1)));
        let context = snapshot.gate_context();
        assert_eq!(context["artifacts"][0]["path"], "hpa.yaml");
        assert_eq!(context["errors"][0]["unit"], "vpa");
        assert_eq!(context["phases"]["render"]["status"], "completed");
    }

    #[test]
    fn snapshot_is_detached_from_later_writes() {
        let mut state = RunState::new(Value::Null);
        state.record_phase(completed("one", json!(1)));
        let snapshot = state.snapshot();
        state.record_phase(completed("two", json!(2)));

        assert!(snapshot.has_phase("one"));
        assert!(!snapshot.has_phase("two"));
        assert_eq!(state.records().len(), 2);
    }

    #[test]
    fn recorded_error_constructors_set_fatality() {
        let warn = RecordedError::warning("vpa", None, FailureKind::ExecutionFailure, "boom");
        let fatal = RecordedError::fatal("hpa", Some("apply"), FailureKind::ExecutionFailure, "boom");
        assert!(!warn.fatal);
        assert!(fatal.fatal);
        assert_eq!(fatal.unit.as_deref(), Some("apply"));
    }
}
