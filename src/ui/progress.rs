//! Terminal progress for a running process.
//!
//! [`RunUI`] consumes [`RunEvent`]s from the executor's event channel and
//! renders them in one of three modes:
//! - `full`: a phase counter bar plus one spinner per running phase
//! - `minimal`: one plain line per phase outcome
//! - `json`: one JSON object per event on stdout

use console::{Term, style};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use phasegate_common::DecisionKind;
use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::executor::RunEvent;
use crate::outcome::RunStatus;
use crate::ui::icons::{CHECK, CLOCK, CROSS, GATE, RUNNING, SCORE, SKIPPED, SPARKLE, WARN};

/// Output mode for the run UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UiMode {
    /// Progress bars and colors
    #[default]
    Full,
    /// Single-line status updates
    Minimal,
    /// JSON-formatted events
    Json,
}

impl std::str::FromStr for UiMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "minimal" => Self::Minimal,
            _ => Self::Full,
        })
    }
}

impl UiMode {
    pub fn parse(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░")
}

/// Renders run progress from executor events.
///
/// Events arrive from a single channel, so the UI holds its bars without
/// locking; all methods take `&mut self`.
pub struct RunUI {
    mode: UiMode,
    multi: MultiProgress,
    header_bar: ProgressBar,
    phase_bars: HashMap<String, ProgressBar>,
    verbose: bool,
    term: Term,
}

impl RunUI {
    pub fn new(total_phases: usize, mode: UiMode, verbose: bool) -> Self {
        let multi = MultiProgress::new();
        if mode != UiMode::Full {
            multi.set_draw_target(ProgressDrawTarget::hidden());
        }

        let header_bar = multi.add(ProgressBar::new(total_phases as u64));
        header_bar.set_style(bar_style(
            "{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        ));
        header_bar.set_prefix("Phases");
        header_bar.set_message("Starting...");

        Self {
            mode,
            multi,
            header_bar,
            phase_bars: HashMap::new(),
            verbose,
            term: Term::stdout(),
        }
    }

    pub fn mode(&self) -> UiMode {
        self.mode
    }

    /// Handle to the bars, for prompts that must suspend drawing.
    pub fn progress(&self) -> MultiProgress {
        self.multi.clone()
    }

    /// Render events until the executor drops its sender.
    pub async fn drain(mut self, mut rx: mpsc::Receiver<RunEvent>) {
        while let Some(event) = rx.recv().await {
            self.handle_event(&event);
        }
    }

    pub fn handle_event(&mut self, event: &RunEvent) {
        match self.mode {
            UiMode::Json => self.handle_json(event),
            UiMode::Minimal => self.handle_minimal(event),
            UiMode::Full => self.handle_full(event),
        }
    }

    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    fn handle_json(&self, event: &RunEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            let _ = writeln!(&self.term, "{}", json);
        }
    }

    fn handle_minimal(&self, event: &RunEvent) {
        let line = match event {
            RunEvent::PhaseCompleted { phase, .. } => format!("✓ {}", phase),
            RunEvent::PhaseSkipped { phase } => format!("- {} (skipped)", phase),
            RunEvent::PhaseFailed {
                phase,
                required,
                message,
                ..
            } => {
                let marker = if *required { "✗" } else { "!" };
                format!("{} {} ({})", marker, phase, message)
            }
            RunEvent::BreakpointResolved {
                gate, decision, ..
            } => format!("? {}: {}", gate, decision),
            RunEvent::RunFinished {
                status,
                score,
                verdict,
            } => match (score, verdict) {
                (Some(score), Some(verdict)) => {
                    format!("Done: {} ({:.1}, {})", status, score, verdict)
                }
                _ => format!("Done: {}", status),
            },
            _ => return,
        };
        let _ = writeln!(&self.term, "{}", line);
    }

    fn handle_full(&mut self, event: &RunEvent) {
        match event {
            RunEvent::RunStarted {
                process, phases, ..
            } => {
                self.header_bar.set_length(*phases as u64);
                self.header_bar.set_message(process.clone());
            }
            RunEvent::PhaseStarted { phase, units, .. } => self.on_phase_started(phase, *units),
            RunEvent::PhaseSkipped { phase } => {
                self.header_bar.inc(1);
                self.print_line(format!(
                    "  {}Phase {} {}",
                    SKIPPED,
                    style(phase).dim(),
                    style("skipped").dim()
                ));
            }
            RunEvent::UnitFinished {
                phase,
                unit,
                success,
            } => self.on_unit_finished(phase, unit, *success),
            RunEvent::PhaseCompleted { phase, duration_ms } => {
                self.on_phase_completed(phase, *duration_ms)
            }
            RunEvent::PhaseFailed {
                phase,
                required,
                message,
                ..
            } => self.on_phase_failed(phase, *required, message),
            RunEvent::BreakpointTriggered { gate, title, .. } => {
                if self.verbose {
                    self.print_line(format!("  {}{} ({})", GATE, style(title).bold(), gate));
                }
            }
            RunEvent::BreakpointResolved { gate, decision, .. } => {
                let decision = match decision {
                    DecisionKind::Approved => style("approved").green(),
                    DecisionKind::Rejected => style("rejected").red(),
                };
                self.print_line(format!("  {}Breakpoint {} {}", GATE, style(gate).yellow(), decision));
            }
            RunEvent::RunFinished {
                status,
                score,
                verdict,
            } => self.on_run_finished(*status, *score, verdict.as_deref()),
        }
    }

    fn on_phase_started(&mut self, phase: &str, units: usize) {
        let bar = self.multi.add(ProgressBar::new(units as u64));
        bar.set_style(bar_style("  {prefix:.bold} {spinner} {pos}/{len} units {msg}"));
        bar.set_prefix(format!("[{}]", phase));
        bar.set_message(format!("{}", RUNNING));
        bar.enable_steady_tick(Duration::from_millis(100));
        self.header_bar.set_message(phase.to_string());
        self.phase_bars.insert(phase.to_string(), bar);
    }

    fn on_unit_finished(&self, phase: &str, unit: &str, success: bool) {
        if let Some(bar) = self.phase_bars.get(phase) {
            bar.inc(1);
        }
        if !success || self.verbose {
            let marker = if success { CHECK } else { CROSS };
            self.print_line(format!("    {}{}/{}", marker, phase, style(unit).yellow()));
        }
    }

    fn on_phase_completed(&mut self, phase: &str, duration_ms: u64) {
        if let Some(bar) = self.phase_bars.remove(phase) {
            bar.finish_and_clear();
        }
        self.header_bar.inc(1);
        self.print_line(format!(
            "  {}Phase {} {} ({})",
            CHECK,
            style(phase).green().bold(),
            style("complete").green(),
            format_duration(Duration::from_millis(duration_ms))
        ));
    }

    fn on_phase_failed(&mut self, phase: &str, required: bool, message: &str) {
        if let Some(bar) = self.phase_bars.remove(phase) {
            bar.finish_and_clear();
        }
        self.header_bar.inc(1);
        if required {
            self.print_line(format!(
                "  {}Phase {} {}: {}",
                CROSS,
                style(phase).red().bold(),
                style("failed").red(),
                message
            ));
        } else {
            self.print_line(format!(
                "  {}Phase {} {} (optional): {}",
                WARN,
                style(phase).yellow().bold(),
                style("failed").yellow(),
                message
            ));
        }
    }

    fn on_run_finished(&mut self, status: RunStatus, score: Option<f64>, verdict: Option<&str>) {
        for (_, bar) in self.phase_bars.drain() {
            bar.finish_and_clear();
        }
        self.header_bar.finish_and_clear();

        self.print_line("");
        match status {
            RunStatus::Completed => self.print_line(format!(
                "{}Run {} {}",
                SPARKLE,
                style("COMPLETE").green().bold(),
                SPARKLE
            )),
            RunStatus::Aborted => {
                self.print_line(format!("{}Run {}", CROSS, style("ABORTED").red().bold()))
            }
        }
        if let (Some(score), Some(verdict)) = (score, verdict) {
            self.print_line(format!(
                "{}Score: {} ({})",
                SCORE,
                style(format!("{:.1}", score)).cyan().bold(),
                verdict
            ));
        }
    }

    /// Print the phase plan before execution starts.
    pub fn print_plan(&self, process: &str, phases: &[(String, bool)]) {
        if self.mode != UiMode::Full {
            return;
        }
        self.print_line(format!(
            "{}{} ({} phases)",
            CLOCK,
            style(process).bold(),
            style(phases.len()).yellow()
        ));
        for (index, (name, required)) in phases.iter().enumerate() {
            let tag = if *required {
                String::new()
            } else {
                format!(" {}", style("(optional)").dim())
            };
            self.print_line(format!("  {}. {}{}", index + 1, style(name).cyan(), tag));
        }
        self.print_line("");
    }
}

/// Format a duration for display.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{}s", secs)
    } else {
        format!("{}ms", d.as_millis())
    }
}
