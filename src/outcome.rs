//! The value a run returns, and its on-disk report form.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use phasegate_common::{Artifact, FailureKind};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::score::FinalScore;
use crate::state::{RecordedError, RunSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Aborted,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Aborted => write!(f, "aborted"),
        }
    }
}

/// Why an aborted run stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbortReason {
    pub phase: String,
    pub kind: FailureKind,
    pub message: String,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "phase '{}' {}: {}", self.phase, self.kind, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub process: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort: Option<AbortReason>,
    pub state: RunSnapshot,
    /// `None` when no phase registered a score component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_score: Option<FinalScore>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn score(&self) -> Option<f64> {
        self.final_score.as_ref().map(|s| s.score)
    }

    pub fn verdict(&self) -> Option<&str> {
        self.final_score.as_ref().map(|s| s.verdict.as_str())
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.state.artifacts
    }

    pub fn errors(&self) -> &[RecordedError] {
        &self.state.errors
    }

    /// `<started_at>_<first 8 chars of run id>.json`
    pub fn report_file_name(&self) -> String {
        format!(
            "{}_{}.json",
            self.started_at.format("%Y-%m-%dT%H-%M-%S"),
            &self.run_id.to_string()[..8]
        )
    }

    /// Write the outcome as pretty JSON into `dir`, creating it if needed.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create report directory {}", dir.display()))?;
        let path = dir.join(self.report_file_name());
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run outcome")?;
        fs::write(&path, json).context("Failed to write run report")?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read run report")?;
        serde_json::from_str(&content).context("Failed to parse run report")
    }

    /// Plain-text report of the run.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Process: {}", self.process);
        let _ = writeln!(out, "Run:     {}", self.run_id);
        let _ = writeln!(
            out,
            "Status:  {} ({:.1}s)",
            self.status,
            self.duration_ms as f64 / 1000.0
        );
        if let Some(abort) = &self.abort {
            let _ = writeln!(out, "Aborted: {}", abort);
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "Phases:");
        for record in &self.state.phases {
            let _ = write!(out, "  {:<24} {:<10}", record.phase, record.status.as_str());
            if record.units > 0 {
                let _ = write!(
                    out,
                    " {}/{} units ok",
                    record.units - record.failed_units,
                    record.units
                );
            }
            let _ = writeln!(out);
        }

        if !self.state.breakpoints.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Breakpoints:");
            for bp in &self.state.breakpoints {
                let decision = bp
                    .decision
                    .as_ref()
                    .map(|d| d.kind.to_string())
                    .unwrap_or_else(|| "pending".to_string());
                let _ = write!(out, "  {} after {}: {} ({})", bp.gate, bp.phase, decision, bp.policy);
                if let Some(notes) = bp.decision.as_ref().and_then(|d| d.notes.as_deref()) {
                    let _ = write!(out, " - {}", notes);
                }
                let _ = writeln!(out);
            }
        }

        if !self.state.errors.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Errors:");
            for err in &self.state.errors {
                let marker = if err.fatal { "fatal" } else { "warn" };
                let _ = write!(out, "  [{}] {}", marker, err.phase);
                if let Some(unit) = &err.unit {
                    let _ = write!(out, "/{}", unit);
                }
                let _ = writeln!(out, " {}: {}", err.kind, err.message);
            }
        }

        if !self.state.artifacts.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Artifacts:");
            for artifact in &self.state.artifacts {
                let _ = writeln!(out, "  {} ({})", artifact.path, artifact.format);
            }
        }

        let _ = writeln!(out);
        match &self.final_score {
            Some(score) => {
                let _ = writeln!(out, "Score:   {:.1} ({})", score.score, score.verdict);
                if let Some(warning) = &score.weight_warning {
                    let _ = writeln!(out, "Warning: {}", warning);
                }
            }
            None => {
                let _ = writeln!(out, "Score:   n/a");
            }
        }
        out
    }
}

/// Saved reports in `dir`, most recent first.
pub fn list_reports(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut reports: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == "json"))
        .collect();
    reports.sort();
    reports.reverse();
    Ok(reports)
}
