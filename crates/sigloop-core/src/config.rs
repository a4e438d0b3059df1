//! Configuration management for sigloop.
//!
//! Loads configuration from ${SIGLOOP_HOME}/config.toml with sensible defaults.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Input coordination settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Reject a second pending input request instead of queueing it.
    pub concurrent_check: bool,
    /// Name of background input threads.
    pub thread_name: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            concurrent_check: true,
            thread_name: InputConfig::DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

impl InputConfig {
    const DEFAULT_THREAD_NAME: &'static str = "sigloop-input";
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing` filter directive, e.g. `warn` or `sigloop_core=debug`.
    pub level: String,
    /// Log file; stderr when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub input: InputConfig,
    pub log: LogConfig,
}

/// Returns the default config template.
///
/// This is embedded from default_config.toml at compile time.
fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

pub mod paths {
    //! SIGLOOP_HOME resolution order:
    //! 1. SIGLOOP_HOME environment variable (if set)
    //! 2. ~/.config/sigloop (default)

    use std::path::PathBuf;

    pub fn sigloop_home() -> PathBuf {
        if let Ok(home) = std::env::var("SIGLOOP_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir().map_or_else(
            || PathBuf::from(".sigloop"),
            |h| h.join(".config").join("sigloop"),
        )
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        sigloop_home().join("config.toml")
    }
}

impl Config {
    /// Loads configuration from the default config path.
    ///
    /// # Errors
    /// Fails when the file exists but can't be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    ///
    /// # Errors
    /// Fails when the file exists but can't be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Creates a default config file at the given path.
    /// Returns an error if the file already exists.
    ///
    /// # Errors
    /// Fails when the file exists or can't be written.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }

        Self::write_config(path, default_config_template())
    }

    /// Writes config content to a file, creating parent directories as needed.
    /// Uses atomic write (temp file + rename) to prevent corruption.
    fn write_config(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nonexistent.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert!(config.input.concurrent_check);
        assert_eq!(config.input.thread_name, "sigloop-input");
    }

    #[test]
    fn test_load_partial_config_merges_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(&config_path, "[input]\nconcurrent_check = false\n").unwrap();

        let config = Config::load_from(&config_path).unwrap();
        assert!(!config.input.concurrent_check);
        assert_eq!(config.input.thread_name, "sigloop-input");
        assert_eq!(config.log.level, "warn");
        assert_eq!(config.log.file, None);
    }

    #[test]
    fn test_load_invalid_config_reports_path() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(&config_path, "[input\n").unwrap();

        let err = Config::load_from(&config_path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_init_creates_config_with_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("subdir").join("config.toml");

        Config::init(&config_path).unwrap();

        let contents = fs::read_to_string(&config_path).unwrap();
        assert!(contents.contains("concurrent_check = true"));
        assert!(contents.contains("# file ="));
        assert_eq!(Config::load_from(&config_path).unwrap(), Config::default());
    }

    #[test]
    fn test_init_fails_if_exists() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(&config_path, "").unwrap();

        assert!(Config::init(&config_path).is_err());
    }
}
