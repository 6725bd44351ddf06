//! Configuration for the `phasegate` binary, read from `phasegate.toml`.
//!
//! Settings are layered file → environment → CLI, later layers winning.
//!
//! ```toml
//! [engine]
//! max_parallel = 4
//! weight_tolerance = 0.01
//!
//! [invoker]
//! command = "./agents/run-unit.sh"
//! args = ["--json"]
//! timeout_secs = 300
//!
//! [gates]
//! mode = "interactive"   # or "approve" / "reject"
//!
//! [logging]
//! level = "info"
//! json = false
//! dir = ".phasegate/logs"
//!
//! [output]
//! report_dir = ".phasegate/reports"
//!
//! [phases.overrides."verify-*"]
//! required = false
//!
//! [phases.overrides."vpa"]
//! enabled = false
//! ```
//!
//! Environment: `PHASEGATE_MAX_PARALLEL`, `PHASEGATE_INVOKER_CMD`,
//! `PHASEGATE_GATE_MODE`, `PHASEGATE_LOG`.

use anyhow::{Context, Result};
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::definition::ProcessDefinition;
use crate::fanout::DEFAULT_MAX_PARALLEL;
use crate::invoker::CommandInvokerConfig;
use crate::predicate::Predicate;
use crate::score::DEFAULT_WEIGHT_TOLERANCE;

pub const CONFIG_FILE: &str = "phasegate.toml";

pub const ENV_MAX_PARALLEL: &str = "PHASEGATE_MAX_PARALLEL";
pub const ENV_INVOKER_CMD: &str = "PHASEGATE_INVOKER_CMD";
pub const ENV_GATE_MODE: &str = "PHASEGATE_GATE_MODE";
pub const ENV_LOG: &str = "PHASEGATE_LOG";

/// Who answers breakpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateMode {
    /// Ask at the terminal.
    #[default]
    Interactive,
    /// Approve every breakpoint.
    Approve,
    /// Reject every breakpoint.
    Reject,
}

impl std::fmt::Display for GateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateMode::Interactive => write!(f, "interactive"),
            GateMode::Approve => write!(f, "approve"),
            GateMode::Reject => write!(f, "reject"),
        }
    }
}

impl std::str::FromStr for GateMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "interactive" => Ok(GateMode::Interactive),
            "approve" => Ok(GateMode::Approve),
            "reject" => Ok(GateMode::Reject),
            _ => anyhow::bail!(
                "Invalid gate mode '{}'. Valid values: interactive, approve, reject",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default = "default_weight_tolerance")]
    pub weight_tolerance: f64,
}

fn default_max_parallel() -> usize {
    DEFAULT_MAX_PARALLEL
}

fn default_weight_tolerance() -> f64 {
    DEFAULT_WEIGHT_TOLERANCE
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            weight_tolerance: default_weight_tolerance(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokerSection {
    /// Command run once per unit. Unset means no invoker is configured.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for InvokerSection {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            timeout_secs: default_timeout_secs(),
            working_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatesSection {
    #[serde(default)]
    pub mode: GateMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    crate::logging::DEFAULT_LEVEL.to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputSection {
    #[serde(default)]
    pub report_dir: Option<PathBuf>,
}

/// Per-phase policy override, matched by glob against phase names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseOverride {
    /// Re-classify matching phases as required or optional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    /// `false` forces matching phases to be skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhasesSection {
    #[serde(default)]
    pub overrides: BTreeMap<String, PhaseOverride>,
}

/// Effective policy for one phase after overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseSettings {
    pub required: Option<bool>,
    pub enabled: bool,
}

/// The parsed `phasegate.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhasegateToml {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub invoker: InvokerSection,
    #[serde(default)]
    pub gates: GatesSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub output: OutputSection,
    #[serde(default)]
    pub phases: PhasesSection,
}

impl PhasegateToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse phasegate.toml")
    }

    /// Load `phasegate.toml` from `dir`, or defaults when it does not exist.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize phasegate.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Overrides applied in pattern order; later matches win per field.
    pub fn phase_settings(&self, phase: &str) -> PhaseSettings {
        let mut settings = PhaseSettings {
            required: None,
            enabled: true,
        };
        for (pattern, override_cfg) in &self.phases.overrides {
            if pattern_matches(pattern, phase) {
                if let Some(required) = override_cfg.required {
                    settings.required = Some(required);
                }
                if let Some(enabled) = override_cfg.enabled {
                    settings.enabled = enabled;
                }
            }
        }
        settings
    }

    /// Re-classify and disable phases of `definition` per the override table.
    pub fn apply_overrides(&self, definition: &mut ProcessDefinition) {
        for phase in &mut definition.phases {
            let settings = self.phase_settings(&phase.name);
            if let Some(required) = settings.required {
                tracing::debug!(phase = %phase.name, required, "phase override");
                phase.required = required;
            }
            if !settings.enabled {
                tracing::debug!(phase = %phase.name, "phase disabled by override");
                phase.activation = Predicate::Never;
            }
        }
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.engine.max_parallel == 0 {
            warnings.push("engine.max_parallel is 0; 1 will be used".to_string());
        }
        if !(0.0..1.0).contains(&self.engine.weight_tolerance) {
            warnings.push(format!(
                "engine.weight_tolerance {} is outside [0, 1)",
                self.engine.weight_tolerance
            ));
        }
        if self.invoker.timeout_secs == 0 {
            warnings.push("invoker.timeout_secs is 0; every unit will time out".to_string());
        }
        if self
            .invoker
            .command
            .as_deref()
            .is_some_and(|c| c.trim().is_empty())
        {
            warnings.push("invoker.command is empty".to_string());
        }
        for (pattern, override_cfg) in &self.phases.overrides {
            if let Err(err) = Pattern::new(pattern) {
                warnings.push(format!("Invalid phase pattern '{}': {}", pattern, err));
            }
            if override_cfg.required.is_none() && override_cfg.enabled.is_none() {
                warnings.push(format!("Override for pattern '{}' sets nothing", pattern));
            }
        }
        warnings
    }
}

/// Case-insensitive glob match of a phase name. Invalid patterns match nothing.
pub fn pattern_matches(pattern: &str, name: &str) -> bool {
    let options = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::new()
    };
    Pattern::new(pattern).is_ok_and(|p| p.matches_with(name, options))
}

/// Starter `phasegate.toml` written by `phasegate config init`.
pub const CONFIG_TEMPLATE: &str = r#"# phasegate configuration

[engine]
max_parallel = 4
weight_tolerance = 0.01

[invoker]
# Command run once per unit; the request arrives as JSON on stdin.
# command = "./agents/run-unit.sh"
args = []
timeout_secs = 300

[gates]
mode = "interactive"

[logging]
level = "warn"
json = false
# dir = ".phasegate/logs"

[output]
# report_dir = ".phasegate/reports"

# [phases.overrides."verify-*"]
# required = false
"#;

/// Layered runtime configuration: `phasegate.toml`, environment, then CLI.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub project_dir: PathBuf,
    pub toml: PhasegateToml,
    env: HashMap<String, String>,
    pub cli_max_parallel: Option<usize>,
    pub cli_gate_mode: Option<GateMode>,
    pub cli_report_dir: Option<PathBuf>,
    pub cli_invoker_cmd: Option<String>,
}

impl EngineConfig {
    /// Load from `config_path`, or `phasegate.toml` in `project_dir`.
    pub fn load(project_dir: &Path, config_path: Option<&Path>) -> Result<Self> {
        let toml = match config_path {
            Some(path) => PhasegateToml::load(path)?,
            None => PhasegateToml::load_or_default(project_dir)?,
        };
        Ok(Self::from_toml(project_dir, toml))
    }

    /// Build from an already parsed file, reading the process environment.
    pub fn from_toml(project_dir: &Path, toml: PhasegateToml) -> Self {
        let env = [ENV_MAX_PARALLEL, ENV_INVOKER_CMD, ENV_GATE_MODE, ENV_LOG]
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|v| (key.to_string(), v)))
            .collect();
        Self {
            project_dir: project_dir.to_path_buf(),
            toml,
            env,
            cli_max_parallel: None,
            cli_gate_mode: None,
            cli_report_dir: None,
            cli_invoker_cmd: None,
        }
    }

    /// Replace the captured environment.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    fn env(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str).filter(|v| !v.trim().is_empty())
    }

    /// CLI → `PHASEGATE_MAX_PARALLEL` → file → 4. Never below 1.
    pub fn max_parallel(&self) -> usize {
        self.cli_max_parallel
            .or_else(|| self.env(ENV_MAX_PARALLEL).and_then(|v| v.parse().ok()))
            .unwrap_or(self.toml.engine.max_parallel)
            .max(1)
    }

    pub fn weight_tolerance(&self) -> f64 {
        self.toml.engine.weight_tolerance.abs()
    }

    /// CLI → `PHASEGATE_GATE_MODE` → file.
    pub fn gate_mode(&self) -> GateMode {
        self.cli_gate_mode
            .or_else(|| self.env(ENV_GATE_MODE).and_then(|v| v.parse().ok()))
            .unwrap_or(self.toml.gates.mode)
    }

    /// `PHASEGATE_LOG` → file.
    pub fn log_level(&self) -> String {
        self.env(ENV_LOG)
            .map(str::to_string)
            .unwrap_or_else(|| self.toml.logging.level.clone())
    }

    pub fn log_dir(&self) -> Option<PathBuf> {
        self.toml.logging.dir.as_ref().map(|d| self.resolve(d))
    }

    /// CLI → file → `.phasegate/reports`, relative to the project directory.
    pub fn report_dir(&self) -> PathBuf {
        self.cli_report_dir
            .as_ref()
            .or(self.toml.output.report_dir.as_ref())
            .map(|d| self.resolve(d))
            .unwrap_or_else(|| self.project_dir.join(".phasegate").join("reports"))
    }

    /// The command invoker settings, if a command is configured anywhere.
    pub fn invoker_config(&self) -> Option<CommandInvokerConfig> {
        let command = self
            .cli_invoker_cmd
            .clone()
            .or_else(|| self.env(ENV_INVOKER_CMD).map(str::to_string))
            .or_else(|| self.toml.invoker.command.clone())?;
        let working_dir = self
            .toml
            .invoker
            .working_dir
            .as_ref()
            .map(|d| self.resolve(d))
            .unwrap_or_else(|| self.project_dir.clone());
        Some(
            CommandInvokerConfig::new(command)
                .with_args(self.toml.invoker.args.clone())
                .with_timeout(self.toml.invoker.timeout_secs)
                .with_working_dir(working_dir),
        )
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.toml.validate();
        if let Some(value) = self.env(ENV_MAX_PARALLEL)
            && value.parse::<usize>().is_err()
        {
            warnings.push(format!("{}='{}' is not a number; ignored", ENV_MAX_PARALLEL, value));
        }
        if let Some(value) = self.env(ENV_GATE_MODE)
            && let Err(err) = value.parse::<GateMode>()
        {
            warnings.push(format!("{}: {}", ENV_GATE_MODE, err));
        }
        warnings
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{PhaseSpec, UnitTemplate};
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_file_uses_defaults() {
        let toml = PhasegateToml::parse("").unwrap();
        assert_eq!(toml.engine.max_parallel, 4);
        assert_eq!(toml.gates.mode, GateMode::Interactive);
        assert_eq!(toml.logging.level, "warn");
        assert!(toml.invoker.command.is_none());
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn template_parses_cleanly() {
        let toml = PhasegateToml::parse(CONFIG_TEMPLATE).unwrap();
        assert!(toml.validate().is_empty());
    }

    #[test]
    fn parse_full_file() {
        let toml = PhasegateToml::parse(
            r#"
            [engine]
            max_parallel = 8
            [invoker]
            command = "agent"
            args = ["--json"]
            timeout_secs = 30
            [gates]
            mode = "approve"
            [phases.overrides."verify-*"]
            required = false
            "#,
        )
        .unwrap();
        assert_eq!(toml.engine.max_parallel, 8);
        assert_eq!(toml.invoker.args, vec!["--json"]);
        assert_eq!(toml.gates.mode, GateMode::Approve);
        assert_eq!(toml.phase_settings("verify-load").required, Some(false));
        assert_eq!(toml.phase_settings("analyze").required, None);
    }

    #[test]
    fn invalid_gate_mode_is_a_parse_error() {
        assert!(PhasegateToml::parse("[gates]\nmode = \"maybe\"").is_err());
        assert!("maybe".parse::<GateMode>().is_err());
        assert_eq!("APPROVE".parse::<GateMode>().unwrap(), GateMode::Approve);
    }

    #[test]
    fn overrides_reclassify_and_disable_phases() {
        let toml = PhasegateToml::parse(
            r#"
            [phases.overrides."configure-*"]
            required = false
            [phases.overrides."CONFIGURE-VPA"]
            enabled = false
            "#,
        )
        .unwrap();
        let mut def = ProcessDefinition::new("k8s")
            .with_phase(PhaseSpec::single("configure-hpa", UnitTemplate::new("u")))
            .with_phase(PhaseSpec::single("configure-vpa", UnitTemplate::new("u")))
            .with_phase(PhaseSpec::single("verify", UnitTemplate::new("u")));
        toml.apply_overrides(&mut def);

        assert!(!def.phases[0].required);
        assert!(def.phases[0].activation.is_always());
        assert!(!def.phases[1].required);
        assert!(matches!(def.phases[1].activation, Predicate::Never));
        assert!(def.phases[2].required);
    }

    #[test]
    fn validate_reports_suspicious_settings() {
        let toml = PhasegateToml::parse(
            r#"
            [engine]
            max_parallel = 0
            weight_tolerance = 2.0
            [invoker]
            timeout_secs = 0
            [phases.overrides."[oops"]
            required = true
            [phases.overrides."noop"]
            "#,
        )
        .unwrap();
        let warnings = toml.validate();
        assert_eq!(warnings.len(), 5);
        assert!(warnings.iter().any(|w| w.contains("Invalid phase pattern")));
        assert!(warnings.iter().any(|w| w.contains("sets nothing")));
    }

    #[test]
    fn layering_prefers_cli_then_env_then_file() {
        let dir = TempDir::new().unwrap();
        let toml = PhasegateToml::parse(
            "[engine]\nmax_parallel = 2\n[gates]\nmode = \"reject\"\n[invoker]\ncommand = \"file-agent\"",
        )
        .unwrap();
        let mut config = EngineConfig::from_toml(dir.path(), toml).with_env(HashMap::new());
        assert_eq!(config.max_parallel(), 2);
        assert_eq!(config.gate_mode(), GateMode::Reject);
        assert_eq!(config.invoker_config().unwrap().command, "file-agent");

        config = config.with_env(env(&[
            (ENV_MAX_PARALLEL, "6"),
            (ENV_GATE_MODE, "approve"),
            (ENV_INVOKER_CMD, "env-agent"),
            (ENV_LOG, "debug"),
        ]));
        assert_eq!(config.max_parallel(), 6);
        assert_eq!(config.gate_mode(), GateMode::Approve);
        assert_eq!(config.invoker_config().unwrap().command, "env-agent");
        assert_eq!(config.log_level(), "debug");

        config.cli_max_parallel = Some(1);
        config.cli_gate_mode = Some(GateMode::Interactive);
        config.cli_invoker_cmd = Some("cli-agent".into());
        assert_eq!(config.max_parallel(), 1);
        assert_eq!(config.gate_mode(), GateMode::Interactive);
        assert_eq!(config.invoker_config().unwrap().command, "cli-agent");
    }

    #[test]
    fn bad_env_values_fall_back_and_warn() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::from_toml(dir.path(), PhasegateToml::default()).with_env(env(&[
            (ENV_MAX_PARALLEL, "many"),
            (ENV_GATE_MODE, "sometimes"),
        ]));
        assert_eq!(config.max_parallel(), 4);
        assert_eq!(config.gate_mode(), GateMode::Interactive);
        assert_eq!(config.validate().len(), 2);
    }

    #[test]
    fn paths_resolve_against_project_dir() {
        let dir = TempDir::new().unwrap();
        let toml = PhasegateToml::parse(
            "[output]\nreport_dir = \"out\"\n[logging]\ndir = \"/var/log/phasegate\"",
        )
        .unwrap();
        let config = EngineConfig::from_toml(dir.path(), toml).with_env(HashMap::new());
        assert_eq!(config.report_dir(), dir.path().join("out"));
        assert_eq!(config.log_dir(), Some(PathBuf::from("/var/log/phasegate")));
        assert!(config.invoker_config().is_none());
    }

    #[test]
    fn load_and_save_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut toml = PhasegateToml::default();
        toml.engine.max_parallel = 3;
        toml.phases.overrides.insert(
            "vpa".into(),
            PhaseOverride {
                required: None,
                enabled: Some(false),
            },
        );
        toml.save(&path).unwrap();
        assert_eq!(PhasegateToml::load_or_default(dir.path()).unwrap(), toml);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::load(dir.path(), None).unwrap();
        assert_eq!(config.toml, PhasegateToml::default());
        assert!(EngineConfig::load(dir.path(), Some(&dir.path().join("nope.toml"))).is_err());
    }
}
