use anyhow::{Context, Result};
use async_trait::async_trait;
use console::style;
use dialoguer::{Input, Select, theme::ColorfulTheme};
use indicatif::MultiProgress;
use phasegate_common::Decision;

use super::{Breakpoint, DecisionProvider, GatePolicy};

/// Asks a human at the terminal.
///
/// The prompt runs on a blocking thread so the runtime keeps driving any
/// other tasks while the question is open.
#[derive(Debug, Clone, Default)]
pub struct InteractiveApprover {
    /// Ask for free-form notes after the decision.
    pub ask_notes: bool,
    /// Progress bars to suspend while the prompt is open.
    progress: Option<MultiProgress>,
}

impl InteractiveApprover {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_notes(mut self, ask_notes: bool) -> Self {
        self.ask_notes = ask_notes;
        self
    }

    pub fn with_progress(mut self, progress: MultiProgress) -> Self {
        self.progress = Some(progress);
        self
    }
}

#[async_trait]
impl DecisionProvider for InteractiveApprover {
    async fn present(&self, breakpoint: &Breakpoint) -> Result<Decision> {
        let breakpoint = breakpoint.clone();
        let ask_notes = self.ask_notes;
        let progress = self.progress.clone();
        tokio::task::spawn_blocking(move || match progress {
            Some(progress) => progress.suspend(|| prompt_user(&breakpoint, ask_notes)),
            None => prompt_user(&breakpoint, ask_notes),
        })
        .await
            .context("Breakpoint prompt task failed")?
    }
}

fn prompt_user(breakpoint: &Breakpoint, ask_notes: bool) -> Result<Decision> {
    println!();
    println!(
        "{} {}",
        style("Breakpoint:").bold().yellow(),
        style(&breakpoint.title).bold()
    );
    println!(
        "  {} after phase {} ({})",
        style("gate").dim(),
        style(&breakpoint.phase).cyan(),
        breakpoint.gate
    );
    if let Some(total) = breakpoint.context.pointer("/score/total") {
        println!("  {} {}", style("score so far").dim(), total);
    }
    if let Some(artifacts) = breakpoint.context["artifacts"].as_array() {
        println!("  {} {}", style("artifacts").dim(), artifacts.len());
    }
    if let Some(errors) = breakpoint.context["errors"].as_array() {
        println!("  {} {}", style("errors recorded").dim(), errors.len());
    }

    let reject_label = match breakpoint.policy {
        GatePolicy::Blocking => "Reject and abort the run",
        GatePolicy::Advisory => "Reject (recorded, run continues)",
    };
    let options = &["Approve and continue", reject_label];

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(&breakpoint.question)
        .items(options)
        .default(0)
        .interact()?;

    let mut decision = match selection {
        0 => Decision::approved(),
        _ => Decision::rejected(),
    };

    if ask_notes {
        let notes: String = Input::with_theme(&ColorfulTheme::default())
            .with_prompt("Notes (optional)")
            .allow_empty(true)
            .interact_text()?;
        if !notes.trim().is_empty() {
            decision = decision.with_notes(notes.trim());
        }
    }

    Ok(decision.decided_by(whoami()))
}

fn whoami() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "operator".to_string())
}
