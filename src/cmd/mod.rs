//! CLI command implementations.
//!
//! | Module     | Commands handled       |
//! |------------|------------------------|
//! | `run`      | `Run`                  |
//! | `validate` | `Validate`, `List`     |
//! | `reports`  | `Reports`              |
//! | `config`   | `Config`               |

pub mod config;
pub mod reports;
pub mod run;
pub mod validate;

pub use config::cmd_config;
pub use reports::cmd_reports;
pub use run::{RunOptions, cmd_run};
pub use validate::{cmd_list, cmd_validate};

use anyhow::Result;
use phasegate::config::EngineConfig;
use phasegate::definition::ProcessDefinition;
use phasegate::process_file::ProcessFile;
use std::path::Path;

/// Load a process file and apply the configured phase overrides.
///
/// Returns the definition unvalidated so callers decide how to report errors.
pub(crate) fn load_process(config: &EngineConfig, path: &Path) -> Result<ProcessDefinition> {
    let mut definition = ProcessFile::load(path)?.to_definition();
    config.toml.apply_overrides(&mut definition);
    Ok(definition)
}
