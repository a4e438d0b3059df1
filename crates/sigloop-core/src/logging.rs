//! Tracing subscriber setup.
//!
//! stdout belongs to the application UI, so logs go to stderr or to the
//! configured file. `SIGLOOP_LOG` overrides the configured filter.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

pub const LOG_ENV: &str = "SIGLOOP_LOG";

fn filter(config: &LogConfig) -> Result<EnvFilter> {
    build_filter(std::env::var(LOG_ENV).ok().as_deref(), &config.level)
}

fn build_filter(env: Option<&str>, level: &str) -> Result<EnvFilter> {
    let directives = env.filter(|v| !v.trim().is_empty()).unwrap_or(level);
    EnvFilter::try_new(directives).with_context(|| format!("invalid log filter '{directives}'"))
}

/// Installs the global subscriber.
///
/// Keep the returned guard alive for the life of the program when logging to
/// a file; dropping it flushes and stops the writer thread.
///
/// # Errors
/// Fails on an invalid filter, an unusable log file location, or when a
/// global subscriber is already installed.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let filter = filter(config)?;

    let Some(path) = &config.file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))?;
        return Ok(None);
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .with_context(|| format!("log file {} has no file name", path.display()))?;
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))?;
    Ok(Some(guard))
}
