//! Static checks on a process file: `phasegate validate` and `phasegate list`.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use phasegate::config::EngineConfig;
use phasegate::definition::PhaseWork;
use phasegate::predicate::Predicate;

pub fn cmd_validate(config: &EngineConfig, process: &Path) -> Result<()> {
    let definition = super::load_process(config, process)?;

    println!();
    println!("Validating {}...", process.display());
    println!();

    definition
        .validate()
        .with_context(|| format!("Process '{}' failed validation", definition.name))?;

    let mut warnings = config.validate();
    if let Some(warning) = definition.weight_warning(config.weight_tolerance()) {
        warnings.push(warning);
    }
    if config.invoker_config().is_none() {
        warnings.push("No invoker command configured; 'run' needs one".to_string());
    }

    println!(
        "Process '{}' is valid ({} phases).",
        style(&definition.name).bold(),
        definition.phases.len()
    );
    if !warnings.is_empty() {
        println!();
        println!("Warnings:");
        for warning in warnings {
            println!("  - {}", warning);
        }
    }
    println!();
    Ok(())
}

pub fn cmd_list(config: &EngineConfig, process: &Path) -> Result<()> {
    let definition = super::load_process(config, process)?;

    println!();
    println!("{}", style(&definition.name).bold());
    if !definition.description.is_empty() {
        println!("{}", style(&definition.description).dim());
    }
    println!();

    for (index, phase) in definition.phases.iter().enumerate() {
        let kind = match &phase.work {
            PhaseWork::Single(_) => "single".to_string(),
            PhaseWork::FanOut { policy, .. } => format!("fan-out, {}", policy),
        };
        let required = if phase.required {
            style("required").green()
        } else {
            style("optional").yellow()
        };
        println!(
            "{:>3}. {} [{}] ({})",
            index + 1,
            style(&phase.name).cyan().bold(),
            required,
            kind
        );
        if !phase.description.is_empty() {
            println!("       {}", phase.description);
        }
        let units: Vec<&str> = phase.work.units().iter().map(|u| u.name.as_str()).collect();
        println!("       units: {}", units.join(", "));
        match &phase.activation {
            Predicate::Always => {}
            Predicate::Never => println!("       {}", style("disabled").red()),
            other => println!("       when: {}", other.describe()),
        }
        for gate in &phase.gates {
            let trigger = if gate.is_unconditional() {
                String::new()
            } else {
                format!(" when {}", gate.trigger.describe())
            };
            println!(
                "       gate: {} ({}){}",
                gate.name, gate.policy, trigger
            );
        }
        for score in &phase.scores {
            let weight = definition
                .weight(&score.component)
                .map(|w| format!("{:.2}", w))
                .unwrap_or_else(|| "?".to_string());
            println!(
                "       score: {} x{} from '{}'",
                score.component, weight, score.pointer
            );
        }
    }
    println!();
    Ok(())
}
