//! Declarative process files.
//!
//! A process can be described in TOML (default) or JSON (`.json` extension):
//!
//! ```toml
//! name = "k8s-autoscaling"
//!
//! [scoring]
//! weights = { readiness = 0.6, coverage = 0.4 }
//! fallback_verdict = "not-ready"
//! verdicts = [{ min = 80, label = "ready" }]
//!
//! [[phases]]
//! name = "analyze"
//! units = [{ name = "inventory", input = { cluster = "prod" } }]
//! scores = [{ component = "readiness", pointer = "/readiness" }]
//!
//! [[phases]]
//! name = "configure"
//! required = false
//! join = "best_effort"
//! when = { kind = "flag", path = "/phases/analyze/output/scalable" }
//! units = [
//!   { name = "hpa", bind = { pods = "/phases/analyze/output/pods" } },
//!   { name = "vpa" },
//! ]
//! gates = [{ name = "review", title = "Review", question = "Apply?", policy = "blocking" }]
//! ```
//!
//! A phase with exactly one unit runs it directly; more units, or
//! `fan_out = true`, make it a fan-out phase.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::definition::{PhaseSpec, PhaseWork, ProcessDefinition, ScoreBinding, UnitTemplate};
use crate::fanout::JoinPolicy;
use crate::gate::GateSpec;
use crate::predicate::Predicate;
use crate::score::{VerdictTable, VerdictThreshold};

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoringSection {
    #[serde(default)]
    pub weights: BTreeMap<String, f64>,
    /// Replaces the default verdict table when non-empty.
    #[serde(default)]
    pub verdicts: Vec<VerdictThreshold>,
    #[serde(default)]
    pub fallback_verdict: Option<String>,
}

impl ScoringSection {
    fn verdict_table(&self) -> VerdictTable {
        if self.verdicts.is_empty() {
            let table = VerdictTable::default();
            return match &self.fallback_verdict {
                Some(fallback) => table
                    .thresholds()
                    .iter()
                    .fold(VerdictTable::new(fallback), |t, row| {
                        t.with_threshold(row.min, &row.label)
                    }),
                None => table,
            };
        }
        let fallback = self
            .fallback_verdict
            .as_deref()
            .unwrap_or(VerdictTable::default().fallback())
            .to_string();
        self.verdicts
            .iter()
            .fold(VerdictTable::new(&fallback), |t, row| {
                t.with_threshold(row.min, &row.label)
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitEntry {
    pub name: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub bind: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_shape: Option<Value>,
}

impl UnitEntry {
    fn into_template(self) -> UnitTemplate {
        let mut template = UnitTemplate::new(&self.name).with_input(self.input);
        template.bind = self.bind;
        match self.output_shape {
            Some(shape) => template.with_output_shape(shape),
            None => template,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub when: Predicate,
    #[serde(default)]
    pub fan_out: bool,
    #[serde(default)]
    pub join: JoinPolicy,
    #[serde(default)]
    pub units: Vec<UnitEntry>,
    #[serde(default)]
    pub gates: Vec<GateSpec>,
    #[serde(default)]
    pub scores: Vec<ScoreBinding>,
}

impl PhaseEntry {
    fn into_spec(self) -> PhaseSpec {
        let fan_out = self.fan_out || self.units.len() != 1;
        let mut units: Vec<UnitTemplate> =
            self.units.into_iter().map(UnitEntry::into_template).collect();
        let work = match units.pop() {
            Some(unit) if !fan_out => PhaseWork::Single(unit),
            last => {
                units.extend(last);
                PhaseWork::FanOut {
                    units,
                    policy: self.join,
                }
            }
        };
        PhaseSpec {
            name: self.name,
            description: self.description,
            required: self.required,
            activation: self.when,
            work,
            gates: self.gates,
            scores: self.scores,
        }
    }
}

/// A process as written on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessFile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub scoring: ScoringSection,
    #[serde(default)]
    pub phases: Vec<PhaseEntry>,
}

impl ProcessFile {
    /// Load a process file; `.json` files are parsed as JSON, anything else as TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read process file: {}", path.display()))?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::parse_json(&content)
        } else {
            Self::parse_toml(&content)
        }
        .with_context(|| format!("Invalid process file: {}", path.display()))
    }

    pub fn parse_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse process TOML")
    }

    pub fn parse_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse process JSON")
    }

    /// Build the definition without validating it.
    pub fn to_definition(&self) -> ProcessDefinition {
        let mut definition = ProcessDefinition::new(&self.name)
            .with_description(&self.description)
            .with_verdicts(self.scoring.verdict_table());
        definition.score_weights = self.scoring.weights.clone();
        definition.phases = self
            .phases
            .iter()
            .cloned()
            .map(PhaseEntry::into_spec)
            .collect();
        definition
    }

    /// Build and validate the definition.
    pub fn into_definition(self) -> Result<ProcessDefinition> {
        let definition = self.to_definition();
        definition
            .validate()
            .with_context(|| format!("Process '{}' failed validation", definition.name))?;
        Ok(definition)
    }
}

/// Load, build and validate a process definition from `path`.
pub fn load_definition(path: &Path) -> Result<ProcessDefinition> {
    ProcessFile::load(path)?.into_definition()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::GatePolicy;
    use crate::predicate::CompareOp;
    use serde_json::json;
    use tempfile::TempDir;

    const K8S: &str = r#"
name = "k8s-autoscaling"
description = "Plan and apply autoscaling"

[scoring]
weights = { readiness = 0.6, coverage = 0.4 }

[[phases]]
name = "analyze"
units = [{ name = "inventory", input = { cluster = "prod" } }]
scores = [{ component = "readiness", pointer = "/readiness" }]

[[phases]]
name = "configure"
required = false
join = "best_effort"
when = { kind = "flag", path = "/phases/analyze/output/scalable" }
units = [
  { name = "hpa", bind = { pods = "/phases/analyze/output/pods" } },
  { name = "vpa", output_shape = { type = "object" } },
]

[[phases.gates]]
name = "low-score"
title = "Low readiness"
question = "Readiness is low. Continue?"
policy = "advisory"
when = { kind = "compare", path = "/score/total", op = "lt", value = 80 }

[[phases]]
name = "report"
fan_out = true
units = [{ name = "summary" }]
"#;

    #[test]
    fn toml_process_builds_definition() {
        let def = ProcessFile::parse_toml(K8S).unwrap().into_definition().unwrap();
        assert_eq!(def.name, "k8s-autoscaling");
        assert_eq!(def.weight("readiness"), Some(0.6));
        assert_eq!(def.phases.len(), 3);

        let analyze = &def.phases[0];
        assert!(analyze.required);
        assert!(!analyze.work.is_fan_out());
        assert_eq!(analyze.work.units()[0].input, json!({"cluster": "prod"}));

        let configure = &def.phases[1];
        assert!(!configure.required);
        assert_eq!(configure.work.policy(), JoinPolicy::BestEffort);
        assert_eq!(configure.work.units().len(), 2);
        assert_eq!(
            configure.work.units()[0].bind.get("pods").map(String::as_str),
            Some("/phases/analyze/output/pods")
        );
        assert!(configure.work.units()[1].output_shape.is_some());
        let gate = &configure.gates[0];
        assert_eq!(gate.policy, GatePolicy::Advisory);
        assert!(matches!(
            gate.trigger,
            Predicate::Compare { op: CompareOp::Lt, .. }
        ));

        assert!(def.phases[2].work.is_fan_out());
        assert_eq!(def.phases[2].work.units().len(), 1);
    }

    #[test]
    fn json_process_is_detected_by_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("iam.json");
        std::fs::write(
            &path,
            serde_json::to_string(&json!({
                "name": "iam-review",
                "phases": [{"name": "collect", "units": [{"name": "policies"}]}]
            }))
            .unwrap(),
        )
        .unwrap();
        let def = load_definition(&path).unwrap();
        assert_eq!(def.name, "iam-review");
        assert_eq!(def.phases[0].work.units()[0].name, "policies");
    }

    #[test]
    fn forward_reference_fails_to_load() {
        let src = r#"
name = "bad"
[[phases]]
name = "plan"
when = { kind = "phase_completed", phase = "apply" }
units = [{ name = "u" }]
[[phases]]
name = "apply"
units = [{ name = "u" }]
"#;
        let err = ProcessFile::parse_toml(src)
            .unwrap()
            .into_definition()
            .unwrap_err();
        let chain = format!("{:#}", err);
        assert!(chain.contains("failed validation"));
        assert!(chain.contains("does not run before it"));
    }

    #[test]
    fn phase_without_units_is_an_empty_fan_out() {
        let src = "name = \"p\"\n[[phases]]\nname = \"empty\"\n";
        let err = ProcessFile::parse_toml(src)
            .unwrap()
            .into_definition()
            .unwrap_err();
        assert!(format!("{:#}", err).contains("has no units"));
    }

    #[test]
    fn custom_verdicts_replace_the_default_table() {
        let src = r#"
name = "p"
[scoring]
fallback_verdict = "not-ready"
verdicts = [{ min = 80, label = "ready" }]
"#;
        let def = ProcessFile::parse_toml(src).unwrap().to_definition();
        assert_eq!(def.verdicts.verdict(85.0), "ready");
        assert_eq!(def.verdicts.verdict(50.0), "not-ready");
    }

    #[test]
    fn fallback_alone_keeps_default_thresholds() {
        let src = "name = \"p\"\n[scoring]\nfallback_verdict = \"failing\"\n";
        let def = ProcessFile::parse_toml(src).unwrap().to_definition();
        assert_eq!(def.verdicts.verdict(95.0), "excellent");
        assert_eq!(def.verdicts.verdict(10.0), "failing");
    }

    #[test]
    fn demo_process_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/k8s-autoscaling.toml");
        let def = load_definition(&path).unwrap();
        assert_eq!(def.phases.len(), 4);
        assert_eq!(def.verdicts.verdict(70.0), "needs-review");
        assert!(def.weight_warning(0.01).is_none());
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = ProcessFile::load(Path::new("/nonexistent/process.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/process.toml"));
    }
}
