use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use phasegate::config::EngineConfig;
use phasegate::logging;
use phasegate::outcome::RunStatus;

mod cmd;

/// Exit status of a run that ended Aborted.
const EXIT_ABORTED: u8 = 2;

#[derive(Parser)]
#[command(name = "phasegate")]
#[command(version, about = "Phase-gated workflow engine with breakpoints and weighted scoring")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Path to phasegate.toml (defaults to <project-dir>/phasegate.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a process file
    Run {
        /// Process file (TOML, or JSON with a .json extension)
        process: PathBuf,

        /// JSON file with the initial input
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Set an input field (key=value, value parsed as JSON when possible)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,

        /// Approve every breakpoint
        #[arg(long, conflicts_with = "reject_all")]
        yes: bool,

        /// Reject every breakpoint
        #[arg(long)]
        reject_all: bool,

        /// Maximum concurrent units in a fan-out phase
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Directory for the JSON run report
        #[arg(long)]
        report_dir: Option<PathBuf>,

        /// Command that executes units (overrides [invoker] command)
        #[arg(long)]
        invoker: Option<String>,

        /// Print the outcome as JSON instead of progress and summary
        #[arg(long)]
        json: bool,

        /// UI output mode: full, minimal, json
        #[arg(long, default_value = "full")]
        ui: String,

        /// Do not write a run report
        #[arg(long)]
        no_report: bool,
    },
    /// Validate a process file
    Validate { process: PathBuf },
    /// List the phases of a process file
    List { process: PathBuf },
    /// List or show saved run reports
    Reports {
        #[command(subcommand)]
        command: Option<ReportsCommands>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ReportsCommands {
    /// List saved reports, most recent first
    List,
    /// Show the summary of a report (path or file name in the report dir)
    Show { report: PathBuf },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default phasegate.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    // `config` must work even when the file is broken, so loading errors are
    // only surfaced by the commands that need the configuration.
    let config = EngineConfig::load(&project_dir, cli.config.as_deref());
    let _log_guard = match &config {
        Ok(config) => logging::init(
            &config.log_level(),
            config.toml.logging.json,
            config.log_dir().as_deref(),
        )?,
        Err(_) => logging::init(logging::DEFAULT_LEVEL, false, None)?,
    };

    match cli.command {
        Commands::Run {
            process,
            input,
            set,
            yes,
            reject_all,
            max_parallel,
            report_dir,
            invoker,
            json,
            ui,
            no_report,
        } => {
            let opts = cmd::RunOptions {
                process,
                input,
                set,
                yes,
                reject_all,
                max_parallel,
                report_dir,
                invoker,
                json,
                ui,
                no_report,
                verbose: cli.verbose,
            };
            let status = cmd::cmd_run(config?, opts).await?;
            if status == RunStatus::Aborted {
                return Ok(ExitCode::from(EXIT_ABORTED));
            }
        }
        Commands::Validate { process } => cmd::cmd_validate(&config?, &process)?,
        Commands::List { process } => cmd::cmd_list(&config?, &process)?,
        Commands::Reports { command } => cmd::cmd_reports(&config?, command)?,
        Commands::Config { command } => {
            cmd::cmd_config(&project_dir, cli.config.as_deref(), command)?
        }
    }

    Ok(ExitCode::SUCCESS)
}
