//! Saved run reports: `phasegate reports`.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use phasegate::config::EngineConfig;
use phasegate::outcome::{RunOutcome, RunStatus, list_reports};

use super::super::ReportsCommands;

pub fn cmd_reports(config: &EngineConfig, command: Option<ReportsCommands>) -> Result<()> {
    let report_dir = config.report_dir();

    match command {
        None | Some(ReportsCommands::List) => {
            let reports = list_reports(&report_dir)?;
            if reports.is_empty() {
                println!("No reports in {}", report_dir.display());
                return Ok(());
            }
            println!();
            println!("Reports in {}", report_dir.display());
            println!();
            for path in reports {
                match RunOutcome::load(&path) {
                    Ok(outcome) => {
                        let status = match outcome.status {
                            RunStatus::Completed => style(outcome.status.to_string()).green(),
                            RunStatus::Aborted => style(outcome.status.to_string()).red(),
                        };
                        let score = outcome
                            .score()
                            .map(|s| format!("{:.1}", s))
                            .unwrap_or_else(|| "n/a".to_string());
                        println!(
                            "  {}  {:<24} {:<10} score {}",
                            file_name(&path),
                            outcome.process,
                            status,
                            score
                        );
                    }
                    Err(err) => {
                        println!("  {}  {}", file_name(&path), style(format!("unreadable: {:#}", err)).dim());
                    }
                }
            }
            println!();
        }
        Some(ReportsCommands::Show { report }) => {
            let path = if report.exists() {
                report
            } else {
                report_dir.join(&report)
            };
            let outcome = RunOutcome::load(&path)
                .with_context(|| format!("Failed to load report {}", path.display()))?;
            println!();
            println!("{}", outcome.summary());
        }
    }

    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
