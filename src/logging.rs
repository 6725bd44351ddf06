//! Tracing subscriber setup for the `phasegate` binary.
//!
//! `RUST_LOG` wins when set; otherwise the configured level applies
//! (default `warn`). Events go to stderr, compact or as JSON lines. With a
//! log directory configured, a daily-rolling plain-text file is written too;
//! keep the returned guard alive until exit so buffered lines are flushed.

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const DEFAULT_LEVEL: &str = "warn";
const LOG_FILE_PREFIX: &str = "phasegate.log";

/// Build the filter: `RUST_LOG`, then `level`, then the default.
pub fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL))
}

pub fn init(level: &str, json: bool, dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let stderr_json = json.then(|| fmt::layer().json().with_writer(std::io::stderr));
    let stderr_compact = (!json).then(|| fmt::layer().compact().with_writer(std::io::stderr));

    let (file_layer, guard) = match dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter(level))
        .with(stderr_json)
        .with(stderr_compact)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
