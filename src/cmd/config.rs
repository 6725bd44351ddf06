//! Configuration view and validation: `phasegate config`.

use anyhow::Result;
use std::path::Path;

use phasegate::config::{CONFIG_FILE, CONFIG_TEMPLATE, EngineConfig, PhasegateToml};

use super::super::ConfigCommands;

pub fn cmd_config(
    project_dir: &Path,
    config_path: Option<&Path>,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let config_path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| project_dir.join(CONFIG_FILE));

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("phasegate configuration");
            println!("=======================");
            println!();

            let toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                PhasegateToml::load(&config_path)?
            } else {
                println!("No {} found at {}", CONFIG_FILE, config_path.display());
                println!("Using default configuration.");
                PhasegateToml::default()
            };
            println!();

            if !toml.phases.overrides.is_empty() {
                println!("[phases.overrides]");
                for (pattern, override_cfg) in &toml.phases.overrides {
                    println!("  \"{}\":", pattern);
                    if let Some(required) = override_cfg.required {
                        println!("    required = {}", required);
                    }
                    if let Some(enabled) = override_cfg.enabled {
                        println!("    enabled = {}", enabled);
                    }
                }
                println!();
            }

            // Effective values include environment overrides
            let config = EngineConfig::from_toml(project_dir, toml);
            println!("Effective values (with env overrides):");
            println!("  max_parallel = {}", config.max_parallel());
            println!("  weight_tolerance = {}", config.weight_tolerance());
            println!("  gate mode = \"{}\"", config.gate_mode());
            match config.invoker_config() {
                Some(invoker) => {
                    println!("  invoker = \"{}\"", invoker.command);
                    if !invoker.args.is_empty() {
                        println!("  invoker args = {:?}", invoker.args);
                    }
                    println!("  invoker timeout = {}s", invoker.timeout_secs);
                }
                None => println!("  invoker = (none)"),
            }
            println!("  log level = \"{}\"", config.log_level());
            if let Some(dir) = config.log_dir() {
                println!("  log dir = {}", dir.display());
            }
            println!("  report dir = {}", config.report_dir().display());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let toml = if config_path.exists() {
                PhasegateToml::load(&config_path)?
            } else {
                println!("No {} found. Using defaults.", CONFIG_FILE);
                PhasegateToml::default()
            };
            let warnings = EngineConfig::from_toml(project_dir, toml).validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists at {}", CONFIG_FILE, config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&config_path, CONFIG_TEMPLATE)?;

            println!("Created {} at {}", CONFIG_FILE, config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [invoker] command, args, timeout_secs");
            println!("  - [gates] mode");
            println!("  - [phases.overrides.\"pattern-*\"] for phase-specific settings");
            println!();
        }
    }

    Ok(())
}
