//! Weighted score aggregation and verdict tables.
//!
//! Phases register `(name, weight, value)` components as they complete. At the
//! end of a run the components collapse into a single score in `[0, 100]` and a
//! categorical verdict looked up in a caller-supplied threshold table.

use serde::{Deserialize, Serialize};

/// Default tolerance for the "weights sum to 1.0" check.
pub const DEFAULT_WEIGHT_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponent {
    pub name: String,
    pub weight: f64,
    pub value: f64,
}

/// One row of a verdict table: scores `>= min` earn `label`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictThreshold {
    pub min: f64,
    pub label: String,
}

/// Ordered threshold table mapping a final score to a verdict label.
///
/// Rows are kept sorted by descending `min`; the first row whose `min` the
/// score reaches wins, otherwise the fallback label applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictTable {
    thresholds: Vec<VerdictThreshold>,
    fallback: String,
}

impl Default for VerdictTable {
    fn default() -> Self {
        Self::new("needs-improvement")
            .with_threshold(90.0, "excellent")
            .with_threshold(75.0, "good")
            .with_threshold(60.0, "acceptable")
    }
}

impl VerdictTable {
    /// Empty table; every score maps to `fallback`.
    pub fn new(fallback: &str) -> Self {
        Self {
            thresholds: Vec::new(),
            fallback: fallback.to_string(),
        }
    }

    pub fn with_threshold(mut self, min: f64, label: &str) -> Self {
        self.thresholds.push(VerdictThreshold {
            min,
            label: label.to_string(),
        });
        self.thresholds
            .sort_by(|a, b| b.min.total_cmp(&a.min));
        self
    }

    pub fn thresholds(&self) -> &[VerdictThreshold] {
        &self.thresholds
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    pub fn verdict(&self, score: f64) -> &str {
        self.thresholds
            .iter()
            .find(|t| score >= t.min)
            .map(|t| t.label.as_str())
            .unwrap_or(&self.fallback)
    }
}

/// Result of [`ScoreAggregator::finalize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalScore {
    pub score: f64,
    pub verdict: String,
    pub weight_sum: f64,
    pub components: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_warning: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ScoreAggregator {
    components: Vec<ScoreComponent>,
    tolerance: f64,
}

impl Default for ScoreAggregator {
    fn default() -> Self {
        Self {
            components: Vec::new(),
            tolerance: DEFAULT_WEIGHT_TOLERANCE,
        }
    }
}

impl ScoreAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance.abs();
        self
    }

    pub fn add_component(&mut self, name: &str, weight: f64, value: f64) {
        self.components.push(ScoreComponent {
            name: name.to_string(),
            weight,
            value,
        });
    }

    pub fn components(&self) -> &[ScoreComponent] {
        &self.components
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn weight_sum(&self) -> f64 {
        self.components.iter().map(|c| c.weight).sum()
    }

    /// Describe a weight-sum mismatch, if any.
    pub fn weight_warning(&self) -> Option<String> {
        weight_mismatch(self.weight_sum(), self.tolerance)
    }

    /// Collapse the registered components into a score and verdict.
    ///
    /// Takes `&self`: calling it repeatedly without adding components returns
    /// the same result.
    pub fn finalize(&self, table: &VerdictTable) -> FinalScore {
        let raw: f64 = self.components.iter().map(|c| c.weight * c.value).sum();
        let score = clamp_score(raw);
        let weight_warning = self.weight_warning();
        if let Some(warning) = &weight_warning {
            tracing::warn!(components = self.components.len(), "{}", warning);
        }

        FinalScore {
            score,
            verdict: table.verdict(score).to_string(),
            weight_sum: self.weight_sum(),
            components: self.components.len(),
            weight_warning,
        }
    }
}

/// Warning text when `sum` differs from 1.0 by more than `tolerance`.
pub fn weight_mismatch(sum: f64, tolerance: f64) -> Option<String> {
    if (sum - 1.0).abs() > tolerance {
        Some(format!(
            "Score weights sum to {:.3}, expected 1.0 (tolerance {})",
            sum, tolerance
        ))
    } else {
        None
    }
}

fn clamp_score(raw: f64) -> f64 {
    if raw.is_nan() {
        return 0.0;
    }
    raw.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighted_sum_with_default_table() {
        let mut agg = ScoreAggregator::new();
        agg.add_component("coverage", 0.4, 90.0);
        agg.add_component("security", 0.6, 70.0);

        let result = agg.finalize(&VerdictTable::default());
        assert!((result.score - 78.0).abs() < 1e-9);
        assert_eq!(result.verdict, "good");
        assert_eq!(result.components, 2);
        assert!(result.weight_warning.is_none());
    }

    #[test]
    fn finalize_is_idempotent() {
        let mut agg = ScoreAggregator::new();
        agg.add_component("readiness", 1.0, 64.0);
        let table = VerdictTable::default();
        assert_eq!(agg.finalize(&table), agg.finalize(&table));
    }

    #[test]
    fn score_is_clamped_for_hostile_weights() {
        let table = VerdictTable::default();

        let mut over = ScoreAggregator::new();
        over.add_component("a", 2.0, 100.0);
        over.add_component("b", 1.5, 100.0);
        let result = over.finalize(&table);
        assert_eq!(result.score, 100.0);
        assert!(result.weight_warning.is_some());

        let mut negative = ScoreAggregator::new();
        negative.add_component("a", -1.0, 80.0);
        assert_eq!(negative.finalize(&table).score, 0.0);

        let mut nan = ScoreAggregator::new();
        nan.add_component("a", 1.0, f64::NAN);
        assert_eq!(nan.finalize(&table).score, 0.0);

        let mut inf = ScoreAggregator::new();
        inf.add_component("a", 1.0, f64::INFINITY);
        assert_eq!(inf.finalize(&table).score, 100.0);
    }

    #[test]
    fn weight_mismatch_warns_but_still_scores() {
        let mut agg = ScoreAggregator::new();
        agg.add_component("only", 0.5, 80.0);
        let result = agg.finalize(&VerdictTable::default());
        assert_eq!(result.score, 40.0);
        assert_eq!(result.verdict, "needs-improvement");
        assert!(result.weight_warning.unwrap().contains("0.500"));
    }

    #[test]
    fn verdict_table_sorts_thresholds() {
        let table = VerdictTable::new("fail")
            .with_threshold(50.0, "pass")
            .with_threshold(95.0, "gold");
        assert_eq!(table.verdict(99.0), "gold");
        assert_eq!(table.verdict(50.0), "pass");
        assert_eq!(table.verdict(49.9), "fail");
        assert_eq!(table.thresholds()[0].label, "gold");
    }

    #[test]
    fn default_table_boundaries() {
        let table = VerdictTable::default();
        assert_eq!(table.verdict(90.0), "excellent");
        assert_eq!(table.verdict(89.99), "good");
        assert_eq!(table.verdict(75.0), "good");
        assert_eq!(table.verdict(60.0), "acceptable");
        assert_eq!(table.verdict(0.0), "needs-improvement");
    }
}
