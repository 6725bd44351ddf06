//! Activation and gate predicates over a run snapshot.
//!
//! Predicates are pure functions of a [`RunSnapshot`]. The declarative
//! variants can be written in process files; `Custom` wraps a closure for
//! definitions built in code. Paths are JSON pointers into
//! [`RunSnapshot::view`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::state::{PhaseStatus, RunSnapshot};

/// Comparison operator for numeric predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CompareOp {
    pub fn apply(&self, left: f64, right: f64) -> bool {
        match self {
            CompareOp::Lt => left < right,
            CompareOp::Le => left <= right,
            CompareOp::Gt => left > right,
            CompareOp::Ge => left >= right,
            CompareOp::Eq => approx_eq(left, right),
            CompareOp::Ne => !approx_eq(left, right),
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        }
    }
}

/// Equal within a few ulps of the larger magnitude, so `0.1 + 0.2 == 0.3`
/// holds for scores of any size.
fn approx_eq(left: f64, right: f64) -> bool {
    let scale = left.abs().max(right.abs()).max(1.0);
    (left - right).abs() <= 4.0 * f64::EPSILON * scale
}

type PredicateFn = dyn Fn(&RunSnapshot) -> bool + Send + Sync;

/// Closure-backed predicate for definitions built in code.
#[derive(Clone)]
pub struct CustomPredicate {
    label: String,
    check: Arc<PredicateFn>,
}

impl CustomPredicate {
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl std::fmt::Debug for CustomPredicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomPredicate")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    #[default]
    Always,
    Never,
    /// Value at `path` is truthy (true, non-zero, non-empty).
    Flag { path: String },
    /// Value at `path` equals `value`.
    Equals { path: String, value: Value },
    /// Numeric value at `path` compared against `value`. Missing or
    /// non-numeric values never match.
    Compare {
        path: String,
        op: CompareOp,
        value: f64,
    },
    PhaseCompleted { phase: String },
    PhaseFailed { phase: String },
    All { of: Vec<Predicate> },
    Any { of: Vec<Predicate> },
    Not { predicate: Box<Predicate> },
    #[serde(skip)]
    Custom(CustomPredicate),
}

impl Predicate {
    pub fn flag(path: &str) -> Self {
        Predicate::Flag {
            path: path.to_string(),
        }
    }

    pub fn equals(path: &str, value: Value) -> Self {
        Predicate::Equals {
            path: path.to_string(),
            value,
        }
    }

    pub fn compare(path: &str, op: CompareOp, value: f64) -> Self {
        Predicate::Compare {
            path: path.to_string(),
            op,
            value,
        }
    }

    /// Fires when the running weighted score total is below `threshold`.
    pub fn score_below(threshold: f64) -> Self {
        Self::compare("/score/total", CompareOp::Lt, threshold)
    }

    pub fn phase_completed(phase: &str) -> Self {
        Predicate::PhaseCompleted {
            phase: phase.to_string(),
        }
    }

    pub fn phase_failed(phase: &str) -> Self {
        Predicate::PhaseFailed {
            phase: phase.to_string(),
        }
    }

    pub fn all(of: Vec<Predicate>) -> Self {
        Predicate::All { of }
    }

    pub fn any(of: Vec<Predicate>) -> Self {
        Predicate::Any { of }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(predicate: Predicate) -> Self {
        Predicate::Not {
            predicate: Box::new(predicate),
        }
    }

    pub fn custom<F>(label: &str, check: F) -> Self
    where
        F: Fn(&RunSnapshot) -> bool + Send + Sync + 'static,
    {
        Predicate::Custom(CustomPredicate {
            label: label.to_string(),
            check: Arc::new(check),
        })
    }

    pub fn is_always(&self) -> bool {
        matches!(self, Predicate::Always)
    }

    pub fn evaluate(&self, snapshot: &RunSnapshot) -> bool {
        let view = snapshot.view();
        self.eval(snapshot, &view)
    }

    fn eval(&self, snapshot: &RunSnapshot, view: &Value) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::Never => false,
            Predicate::Flag { path } => view.pointer(path).is_some_and(truthy),
            Predicate::Equals { path, value } => view.pointer(path) == Some(value),
            Predicate::Compare { path, op, value } => view
                .pointer(path)
                .and_then(Value::as_f64)
                .is_some_and(|left| op.apply(left, *value)),
            Predicate::PhaseCompleted { phase } => snapshot
                .phase(phase)
                .is_some_and(|r| r.status == PhaseStatus::Completed),
            Predicate::PhaseFailed { phase } => snapshot
                .phase(phase)
                .is_some_and(|r| matches!(r.status, PhaseStatus::Failed | PhaseStatus::Aborted)),
            Predicate::All { of } => of.iter().all(|p| p.eval(snapshot, view)),
            Predicate::Any { of } => of.iter().any(|p| p.eval(snapshot, view)),
            Predicate::Not { predicate } => !predicate.eval(snapshot, view),
            Predicate::Custom(custom) => (custom.check)(snapshot),
        }
    }

    /// Phases this predicate reads, used for static forward-reference checks.
    /// Closure predicates are opaque and report nothing.
    pub fn referenced_phases(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_phases(&mut out);
        out
    }

    fn collect_phases(&self, out: &mut Vec<String>) {
        match self {
            Predicate::Flag { path }
            | Predicate::Equals { path, .. }
            | Predicate::Compare { path, .. } => {
                if let Some(phase) = phase_in_pointer(path) {
                    out.push(phase);
                }
            }
            Predicate::PhaseCompleted { phase } | Predicate::PhaseFailed { phase } => {
                out.push(phase.clone());
            }
            Predicate::All { of } | Predicate::Any { of } => {
                for p in of {
                    p.collect_phases(out);
                }
            }
            Predicate::Not { predicate } => predicate.collect_phases(out),
            Predicate::Always | Predicate::Never | Predicate::Custom(_) => {}
        }
    }

    /// JSON pointers this predicate dereferences.
    pub fn pointers(&self) -> Vec<&str> {
        match self {
            Predicate::Flag { path }
            | Predicate::Equals { path, .. }
            | Predicate::Compare { path, .. } => vec![path.as_str()],
            Predicate::All { of } | Predicate::Any { of } => {
                of.iter().flat_map(|p| p.pointers()).collect()
            }
            Predicate::Not { predicate } => predicate.pointers(),
            _ => Vec::new(),
        }
    }

    /// Short human-readable rendering, used in logs and `list` output.
    pub fn describe(&self) -> String {
        match self {
            Predicate::Always => "always".to_string(),
            Predicate::Never => "never".to_string(),
            Predicate::Flag { path } => path.clone(),
            Predicate::Equals { path, value } => format!("{} == {}", path, value),
            Predicate::Compare { path, op, value } => {
                format!("{} {} {}", path, op.symbol(), value)
            }
            Predicate::PhaseCompleted { phase } => format!("{} completed", phase),
            Predicate::PhaseFailed { phase } => format!("{} failed", phase),
            Predicate::All { of } => join_described(of, " && "),
            Predicate::Any { of } => join_described(of, " || "),
            Predicate::Not { predicate } => format!("!({})", predicate.describe()),
            Predicate::Custom(custom) => custom.label.clone(),
        }
    }
}

fn join_described(of: &[Predicate], sep: &str) -> String {
    let parts: Vec<String> = of.iter().map(Predicate::describe).collect();
    format!("({})", parts.join(sep))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// `/phases/<name>/...` → `<name>` (with JSON pointer unescaping).
pub(crate) fn phase_in_pointer(pointer: &str) -> Option<String> {
    let mut parts = pointer.strip_prefix('/')?.split('/');
    if parts.next()? != "phases" {
        return None;
    }
    parts
        .next()
        .map(|segment| segment.replace("~1", "/").replace("~0", "~"))
}

/// A JSON pointer is empty or starts with `/`.
pub(crate) fn is_valid_pointer(pointer: &str) -> bool {
    pointer.is_empty() || pointer.starts_with('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eq_tolerates_rounding_at_any_magnitude() {
        assert!(CompareOp::Eq.apply(0.1 + 0.2, 0.3));
        assert!(CompareOp::Eq.apply(82.0 * 0.1 * 10.0, 82.0));
        assert!(CompareOp::Eq.apply(1e6 * (0.1 + 0.2), 1e6 * 0.3));
        assert!(CompareOp::Ne.apply(82.0, 82.001));
        assert!(!CompareOp::Ne.apply(0.1 + 0.2, 0.3));
    }
    use crate::state::PhaseRecord;
    use serde_json::json;

    fn snapshot() -> RunSnapshot {
        RunSnapshot {
            input: json!({"enable_vpa": true, "infra": "kubernetes", "replicas": 0}),
            phases: vec![
                PhaseRecord {
                    phase: "scan".into(),
                    status: PhaseStatus::Completed,
                    output: Some(json!({"critical": 2})),
                    units: 1,
                    failed_units: 0,
                    duration_ms: 1,
                },
                PhaseRecord {
                    phase: "sign".into(),
                    status: PhaseStatus::Failed,
                    output: None,
                    units: 1,
                    failed_units: 1,
                    duration_ms: 1,
                },
            ],
            ..RunSnapshot::default()
        }
    }

    #[test]
    fn flag_and_equals() {
        let snap = snapshot();
        assert!(Predicate::flag("/input/enable_vpa").evaluate(&snap));
        assert!(!Predicate::flag("/input/replicas").evaluate(&snap));
        assert!(!Predicate::flag("/input/missing").evaluate(&snap));
        assert!(Predicate::equals("/input/infra", json!("kubernetes")).evaluate(&snap));
    }

    #[test]
    fn compare_on_phase_output() {
        let snap = snapshot();
        let critical = Predicate::compare("/phases/scan/output/critical", CompareOp::Gt, 0.0);
        assert!(critical.evaluate(&snap));
        let missing = Predicate::compare("/phases/nope/output/critical", CompareOp::Gt, 0.0);
        assert!(!missing.evaluate(&snap));
    }

    #[test]
    fn phase_status_predicates_and_combinators() {
        let snap = snapshot();
        assert!(Predicate::phase_completed("scan").evaluate(&snap));
        assert!(Predicate::phase_failed("sign").evaluate(&snap));
        let both = Predicate::all(vec![
            Predicate::flag("/input/enable_vpa"),
            Predicate::not(Predicate::phase_completed("sign")),
        ]);
        assert!(both.evaluate(&snap));
        assert!(!Predicate::any(vec![Predicate::Never]).evaluate(&snap));
    }

    #[test]
    fn custom_predicate_reads_snapshot() {
        let snap = snapshot();
        let p = Predicate::custom("has two phases", |s| s.phases.len() == 2);
        assert!(p.evaluate(&snap));
        assert_eq!(p.describe(), "has two phases");
    }

    #[test]
    fn referenced_phases_walks_nested_predicates() {
        let p = Predicate::any(vec![
            Predicate::compare("/phases/scan/output/critical", CompareOp::Gt, 0.0),
            Predicate::not(Predicate::phase_completed("sign")),
            Predicate::flag("/input/enable_vpa"),
        ]);
        assert_eq!(p.referenced_phases(), vec!["scan".to_string(), "sign".to_string()]);
    }

    #[test]
    fn deserializes_tagged_form() {
        let p: Predicate = serde_json::from_str(
            r#"{"kind":"compare","path":"/score/total","op":"lt","value":80}"#,
        )
        .unwrap();
        assert_eq!(p.describe(), "/score/total < 80");
    }

    #[test]
    fn pointer_helpers() {
        assert_eq!(phase_in_pointer("/phases/a~1b/output"), Some("a/b".to_string()));
        assert_eq!(phase_in_pointer("/input/x"), None);
        assert!(is_valid_pointer("/input"));
        assert!(!is_valid_pointer("input"));
    }
}
