//! Process execution: `phasegate run <process>`.

use anyhow::{Context, Result};
use console::style;
use indicatif::MultiProgress;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

use phasegate::config::{EngineConfig, GateMode};
use phasegate::context::RunContext;
use phasegate::executor::PhaseExecutor;
use phasegate::gate::{AutoApprover, DecisionProvider, InteractiveApprover};
use phasegate::invoker::{CommandInvoker, TaskInvoker};
use phasegate::outcome::RunStatus;
use phasegate::ui::{RunUI, UiMode};

/// Flags of the `run` subcommand.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub process: PathBuf,
    pub input: Option<PathBuf>,
    pub set: Vec<String>,
    pub yes: bool,
    pub reject_all: bool,
    pub max_parallel: Option<usize>,
    pub report_dir: Option<PathBuf>,
    pub invoker: Option<String>,
    pub json: bool,
    pub ui: String,
    pub no_report: bool,
    pub verbose: bool,
}

pub async fn cmd_run(mut config: EngineConfig, opts: RunOptions) -> Result<RunStatus> {
    if opts.yes {
        config.cli_gate_mode = Some(GateMode::Approve);
    } else if opts.reject_all {
        config.cli_gate_mode = Some(GateMode::Reject);
    }
    config.cli_max_parallel = opts.max_parallel;
    config.cli_report_dir = opts.report_dir.clone();
    config.cli_invoker_cmd = opts.invoker.clone();
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    let definition = super::load_process(&config, &opts.process)?;
    definition
        .validate()
        .with_context(|| format!("Process '{}' failed validation", definition.name))?;

    let input = build_input(opts.input.as_deref(), &opts.set)?;

    let invoker_config = config.invoker_config().context(
        "No invoker command configured. Set [invoker] command in phasegate.toml, \
         PHASEGATE_INVOKER_CMD, or pass --invoker",
    )?;
    let invoker: Arc<dyn TaskInvoker> = Arc::new(CommandInvoker::new(invoker_config));

    let ctx = RunContext::new(&definition.name);
    let cancel = ctx.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "\n{} finishing in-flight units, then stopping",
                style("Interrupted:").yellow().bold()
            );
            cancel.cancel();
        }
    });

    let ui = (!opts.json)
        .then(|| RunUI::new(definition.phases.len(), UiMode::parse(&opts.ui), opts.verbose));
    let approver = approver_for(config.gate_mode(), ui.as_ref().map(RunUI::progress));
    let mut executor = PhaseExecutor::new(invoker, approver)
        .with_max_parallel(config.max_parallel())
        .with_weight_tolerance(config.weight_tolerance());

    let ui_task = match ui {
        Some(ui) => {
            let (tx, rx) = mpsc::channel(64);
            executor = executor.with_event_channel(tx);
            let plan: Vec<(String, bool)> = definition
                .phases
                .iter()
                .map(|p| (p.name.clone(), p.required))
                .collect();
            ui.print_plan(&definition.name, &plan);
            Some(tokio::spawn(ui.drain(rx)))
        }
        None => None,
    };

    let outcome = executor.run(&ctx, &definition, input).await;
    // Dropping the executor closes the event channel so the UI task ends.
    drop(executor);
    if let Some(task) = ui_task {
        task.await.ok();
    }

    let report = if opts.no_report {
        None
    } else {
        Some(outcome.save(&config.report_dir())?)
    };

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!();
        println!("{}", outcome.summary());
        if let Some(path) = &report {
            println!("Report:  {}", path.display());
        }
    }

    Ok(outcome.status)
}

fn approver_for(mode: GateMode, progress: Option<MultiProgress>) -> Arc<dyn DecisionProvider> {
    match mode {
        GateMode::Approve => Arc::new(AutoApprover::approve_all()),
        GateMode::Reject => Arc::new(AutoApprover::reject_all()),
        GateMode::Interactive if console::user_attended() => {
            let approver = InteractiveApprover::new().with_notes(true);
            match progress {
                Some(progress) => Arc::new(approver.with_progress(progress)),
                None => Arc::new(approver),
            }
        }
        GateMode::Interactive => {
            tracing::warn!("no terminal attached; breakpoints will be rejected");
            Arc::new(AutoApprover::reject_all().with_actor("unattended"))
        }
    }
}

/// Initial payload: the `--input` JSON file (or `{}`), then `--set` pairs.
pub fn build_input(path: Option<&Path>, sets: &[String]) -> Result<Value> {
    let mut input = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read input file: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Input file is not valid JSON: {}", path.display()))?
        }
        None => Value::Object(Map::new()),
    };
    if sets.is_empty() {
        return Ok(input);
    }

    let Some(object) = input.as_object_mut() else {
        anyhow::bail!("--set requires the input to be a JSON object");
    };
    for pair in sets {
        let (key, value) = parse_set(pair)?;
        object.insert(key, value);
    }
    Ok(input)
}

/// Parse `key=value`; the value is JSON when it parses, a string otherwise.
pub fn parse_set(pair: &str) -> Result<(String, Value)> {
    let Some((key, raw)) = pair.split_once('=') else {
        anyhow::bail!("Invalid --set '{}': expected key=value", pair);
    };
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("Invalid --set '{}': empty key", pair);
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_parse_set_types() {
        assert_eq!(parse_set("replicas=3").unwrap(), ("replicas".into(), json!(3)));
        assert_eq!(parse_set("dry=true").unwrap(), ("dry".into(), json!(true)));
        assert_eq!(
            parse_set("cluster=prod-eu").unwrap(),
            ("cluster".into(), json!("prod-eu"))
        );
        assert_eq!(parse_set("expr=a=b").unwrap(), ("expr".into(), json!("a=b")));
        assert!(parse_set("novalue").is_err());
        assert!(parse_set("=1").is_err());
    }

    #[test]
    fn test_build_input_merges_file_and_sets() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("input.json");
        std::fs::write(&path, r#"{"cluster": "prod", "replicas": 2}"#).unwrap();

        let input = build_input(Some(&path), &["replicas=5".to_string()]).unwrap();
        assert_eq!(input, json!({"cluster": "prod", "replicas": 5}));
    }

    #[test]
    fn test_build_input_defaults_to_empty_object() {
        assert_eq!(build_input(None, &[]).unwrap(), json!({}));
    }

    #[test]
    fn test_build_input_rejects_set_on_scalar() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("input.json");
        std::fs::write(&path, "42").unwrap();
        assert_eq!(build_input(Some(&path), &[]).unwrap(), json!(42));
        assert!(build_input(Some(&path), &["a=1".to_string()]).is_err());
    }
}
