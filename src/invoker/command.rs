//! Task invoker backed by an external command.
//!
//! Each unit spawns the configured command once:
//! - the unit request is written to stdin as JSON
//! - `PHASEGATE_UNIT`, `PHASEGATE_PHASE` and `PHASEGATE_CORRELATION_ID` are exported
//! - stdout is parsed as JSON once the process exits
//!
//! Stdout of the form `{"output": ..., "artifacts": [...]}` is unpacked into
//! the unit output and its artifacts; any other JSON document is the output
//! value itself. Empty stdout is a `null` output.

use async_trait::async_trait;
use phasegate_common::{Artifact, UnitOutput, UnitResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tokio::time::timeout;
use uuid::Uuid;

use super::{TaskInvoker, UnitOfWork};
use crate::errors::InvokerError;

fn default_timeout_secs() -> u64 {
    300
}

/// How to launch the unit process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandInvokerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Working directory for the process. Inherits the current one when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl CommandInvokerConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            timeout_secs: default_timeout_secs(),
            working_dir: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// The JSON document a unit process receives on stdin.
#[derive(Debug, Serialize)]
pub struct UnitRequest<'a> {
    pub correlation_id: Uuid,
    pub phase: &'a str,
    pub unit: &'a str,
    pub input: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_shape: Option<&'a Value>,
}

impl<'a> From<&'a UnitOfWork> for UnitRequest<'a> {
    fn from(unit: &'a UnitOfWork) -> Self {
        Self {
            correlation_id: unit.correlation_id,
            phase: &unit.phase,
            unit: &unit.name,
            input: &unit.input,
            output_shape: unit.output_shape.as_ref(),
        }
    }
}

#[derive(Deserialize)]
struct PackedOutput {
    output: Value,
    #[serde(default)]
    artifacts: Vec<Artifact>,
}

#[derive(Debug, Clone)]
pub struct CommandInvoker {
    config: CommandInvokerConfig,
}

impl CommandInvoker {
    pub fn new(config: CommandInvokerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CommandInvokerConfig {
        &self.config
    }

    async fn execute(&self, unit: &UnitOfWork) -> Result<UnitOutput, InvokerError> {
        let request =
            serde_json::to_vec(&UnitRequest::from(unit)).map_err(InvokerError::Serialize)?;

        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env("PHASEGATE_UNIT", &unit.name)
            .env("PHASEGATE_PHASE", &unit.phase)
            .env("PHASEGATE_CORRELATION_ID", unit.correlation_id.to_string());
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| InvokerError::SpawnFailed {
            command: self.config.command.clone(),
            source,
        })?;

        // Stdin is fed while stdout is collected: a request larger than the
        // pipe buffer would otherwise deadlock against a child echoing it.
        let stdin = child.stdin.take();
        let limit = Duration::from_secs(self.config.timeout_secs);
        let exchange = async {
            let (written, output) = tokio::join!(
                write_request(stdin, &request),
                child.wait_with_output()
            );
            written?;
            output.map_err(InvokerError::Wait)
        };
        let output = match timeout(limit, exchange).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(InvokerError::Timeout {
                    secs: self.config.timeout_secs,
                });
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            tracing::debug!(unit = %unit.name, stderr = %stderr.trim(), "unit process stderr");
        }
        if !output.status.success() {
            return Err(InvokerError::NonZeroExit {
                exit_code: output.status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            });
        }

        parse_stdout(&String::from_utf8_lossy(&output.stdout))
    }
}

async fn write_request(stdin: Option<ChildStdin>, request: &[u8]) -> Result<(), InvokerError> {
    let Some(mut stdin) = stdin else {
        return Ok(());
    };
    match stdin.write_all(request).await {
        Ok(()) => Ok(()),
        // The process is free to ignore its input.
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(InvokerError::StdinWrite(err)),
    }
}

fn parse_stdout(stdout: &str) -> Result<UnitOutput, InvokerError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(UnitOutput::new(Value::Null));
    }
    let value: Value = serde_json::from_str(trimmed).map_err(InvokerError::InvalidOutput)?;
    let packed = value
        .as_object()
        .is_some_and(|object| object.contains_key("output"));
    if !packed {
        return Ok(UnitOutput::new(value));
    }
    let packed: PackedOutput = serde_json::from_value(value).map_err(InvokerError::InvalidOutput)?;
    Ok(UnitOutput {
        value: packed.output,
        artifacts: packed.artifacts,
    })
}

#[async_trait]
impl TaskInvoker for CommandInvoker {
    async fn invoke(&self, unit: &UnitOfWork) -> UnitResult {
        tracing::debug!(command = %self.config.command, unit = %unit.name, "spawning unit process");
        match self.execute(unit).await {
            Ok(output) => UnitResult::Success(output),
            Err(err) => UnitResult::failure(err.failure_kind(), err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phasegate_common::FailureKind;
    use serde_json::json;

    fn shell(script: &str) -> CommandInvoker {
        CommandInvoker::new(CommandInvokerConfig::new("sh").with_args(["-c", script]))
    }

    fn unit() -> UnitOfWork {
        UnitOfWork::new("analyze", "inventory", json!({"cluster": "prod"}))
    }

    #[tokio::test]
    async fn request_is_written_to_stdin() {
        let invoker = CommandInvoker::new(CommandInvokerConfig::new("cat"));
        let unit = unit();
        let result = invoker.invoke(&unit).await;
        let value = &result.output().unwrap().value;
        assert_eq!(value["phase"], "analyze");
        assert_eq!(value["unit"], "inventory");
        assert_eq!(value["input"]["cluster"], "prod");
        assert_eq!(value["correlation_id"], unit.correlation_id.to_string());
    }

    #[tokio::test]
    async fn packed_output_is_unpacked() {
        let invoker = shell(
            r#"echo '{"output": {"pods": 12}, "artifacts": [{"path": "report.md", "format": "markdown"}]}'"#,
        );
        let result = invoker.invoke(&unit()).await;
        let output = result.output().unwrap();
        assert_eq!(output.value, json!({"pods": 12}));
        assert_eq!(output.artifacts.len(), 1);
        assert_eq!(output.artifacts[0].path, "report.md");
    }

    #[tokio::test]
    async fn environment_identifies_the_unit() {
        let invoker = shell(r#"printf '{"unit":"%s","phase":"%s"}' "$PHASEGATE_UNIT" "$PHASEGATE_PHASE""#);
        let result = invoker.invoke(&unit()).await;
        assert_eq!(
            result.output().unwrap().value,
            json!({"unit": "inventory", "phase": "analyze"})
        );
    }

    #[tokio::test]
    async fn empty_stdout_is_null_output() {
        let result = shell("true").invoke(&unit()).await;
        assert_eq!(result.output().unwrap().value, Value::Null);
    }

    #[tokio::test]
    async fn non_zero_exit_is_execution_failure() {
        let result = shell("echo 'cluster unreachable' >&2; exit 3").invoke(&unit()).await;
        let failure = result.failure_info().unwrap();
        assert_eq!(failure.kind, FailureKind::ExecutionFailure);
        assert!(failure.message.contains("code 3"));
        assert!(failure.message.contains("cluster unreachable"));
    }

    #[tokio::test]
    async fn invalid_json_is_validation_failure() {
        let result = shell("echo 'not json'").invoke(&unit()).await;
        assert_eq!(
            result.failure_info().unwrap().kind,
            FailureKind::ValidationFailure
        );
    }

    #[tokio::test]
    async fn missing_command_is_execution_failure() {
        let invoker =
            CommandInvoker::new(CommandInvokerConfig::new("/nonexistent/phasegate-agent"));
        let result = invoker.invoke(&unit()).await;
        let failure = result.failure_info().unwrap();
        assert_eq!(failure.kind, FailureKind::ExecutionFailure);
        assert!(failure.message.contains("Failed to spawn"));
    }

    #[tokio::test]
    async fn slow_process_times_out() {
        let invoker = CommandInvoker::new(
            CommandInvokerConfig::new("sh")
                .with_args(["-c", "sleep 10"])
                .with_timeout(1),
        );
        let result = invoker.invoke(&unit()).await;
        let failure = result.failure_info().unwrap();
        assert_eq!(failure.kind, FailureKind::ExecutionFailure);
        assert!(failure.message.contains("timed out"));
    }

    #[tokio::test]
    async fn large_request_round_trips_through_cat() {
        let invoker = CommandInvoker::new(CommandInvokerConfig::new("cat").with_timeout(10));
        let manifest = "x".repeat(512 * 1024);
        let unit = UnitOfWork::new("apply", "manifests", json!({"manifest": manifest}));

        let result = tokio::time::timeout(Duration::from_secs(30), invoker.invoke(&unit))
            .await
            .expect("invoke did not return");
        let value = &result.output().unwrap().value;
        assert_eq!(value["input"]["manifest"].as_str().map(str::len), Some(512 * 1024));
    }

    #[tokio::test]
    async fn process_ignoring_large_request_still_times_out() {
        let invoker = CommandInvoker::new(
            CommandInvokerConfig::new("sh")
                .with_args(["-c", "sleep 10"])
                .with_timeout(1),
        );
        let unit = UnitOfWork::new("apply", "manifests", json!({"manifest": "x".repeat(512 * 1024)}));

        let result = tokio::time::timeout(Duration::from_secs(8), invoker.invoke(&unit))
            .await
            .expect("invoke did not return");
        let failure = result.failure_info().unwrap();
        assert_eq!(failure.kind, FailureKind::ExecutionFailure);
        assert!(failure.message.contains("timed out"));
    }

    #[test]
    fn config_defaults_from_toml() {
        let config: CommandInvokerConfig = toml::from_str(r#"command = "agent""#).unwrap();
        assert_eq!(config.timeout_secs, 300);
        assert!(config.args.is_empty());
        assert!(config.working_dir.is_none());
    }
}
