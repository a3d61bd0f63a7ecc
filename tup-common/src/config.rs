//! Configuration loading and resolution
//!
//! Bootstrap configuration comes from a single TOML file. Resolution order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`TUP_CONFIG`)
//! 3. Platform config directory (`~/.config/tup/config.toml` on Linux)
//! 4. Built-in defaults (fallback)
//!
//! Individual settings can then be overridden from the environment
//! (`TUP_MAX_CONCURRENT_UPLOADS`, `TUP_MAX_CONCURRENT_PUBLISHES`, `TUP_LOG_LEVEL`).
//! A missing config file is never fatal.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "TUP_CONFIG";

/// Default number of concurrent storage uploads
pub const DEFAULT_MAX_CONCURRENT_UPLOADS: usize = 4;

/// Default number of concurrent chain publishes
pub const DEFAULT_MAX_CONCURRENT_PUBLISHES: usize = 4;

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Pipeline concurrency settings (optional)
    #[serde(default)]
    pub upload: UploadSettings,

    /// Directory used by the local storage backend (optional)
    #[serde(default)]
    pub store_dir: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Worker pool sizing for the upload pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadSettings {
    /// Upper bound on storage upload workers
    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: usize,

    /// Upper bound on chain publish workers
    #[serde(default = "default_max_concurrent_publishes")]
    pub max_concurrent_publishes: usize,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: DEFAULT_MAX_CONCURRENT_UPLOADS,
            max_concurrent_publishes: DEFAULT_MAX_CONCURRENT_PUBLISHES,
        }
    }
}

impl UploadSettings {
    /// Reject pool sizes that would stall the pipeline
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_uploads == 0 {
            return Err(Error::Config(
                "max_concurrent_uploads must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent_publishes == 0 {
            return Err(Error::Config(
                "max_concurrent_publishes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_concurrent_uploads() -> usize {
    DEFAULT_MAX_CONCURRENT_UPLOADS
}

fn default_max_concurrent_publishes() -> usize {
    DEFAULT_MAX_CONCURRENT_PUBLISHES
}

/// Resolve which config file to read, if any
///
/// Returns `None` when no candidate exists; callers fall back to defaults.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    default_config_path().filter(|p| p.exists())
}

/// Platform config file location (`<config_dir>/tup/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tup").join("config.toml"))
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Load configuration with graceful degradation
///
/// A missing file produces a warning and defaults. A file that exists but
/// fails to parse is an error. Environment overrides apply in both cases.
pub fn load_config(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    let mut config = match resolve_config_path(cli_arg) {
        Some(path) if path.exists() => {
            info!("Loading config from {}", path.display());
            load_toml_config(&path)?
        }
        Some(path) => {
            warn!(
                "Config file {} not found, using built-in defaults",
                path.display()
            );
            TomlConfig::default()
        }
        None => {
            info!("No config file found, using built-in defaults");
            TomlConfig::default()
        }
    };

    apply_env_overrides(&mut config)?;
    config.upload.validate()?;
    Ok(config)
}

/// Apply `TUP_*` environment overrides on top of file values
pub fn apply_env_overrides(config: &mut TomlConfig) -> Result<()> {
    if let Some(value) = env_usize("TUP_MAX_CONCURRENT_UPLOADS")? {
        config.upload.max_concurrent_uploads = value;
    }
    if let Some(value) = env_usize("TUP_MAX_CONCURRENT_PUBLISHES")? {
        config.upload.max_concurrent_publishes = value;
    }
    if let Ok(level) = std::env::var("TUP_LOG_LEVEL") {
        if !level.trim().is_empty() {
            config.logging.level = level.trim().to_string();
        }
    }
    Ok(())
}

fn env_usize(name: &str) -> Result<Option<usize>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{} must be a non-negative integer, got '{}'", name, raw))),
        Err(_) => Ok(None),
    }
}

/// Write config atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    std::fs::write(&temp_path, content)?;
    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = TomlConfig::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.upload.max_concurrent_uploads, 4);
        assert_eq!(config.upload.max_concurrent_publishes, 4);
        assert!(config.store_dir.is_none());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            [upload]
            max_concurrent_uploads = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.upload.max_concurrent_uploads, 8);
        assert_eq!(config.upload.max_concurrent_publishes, 4);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_zero_workers_rejected() {
        let settings = UploadSettings {
            max_concurrent_uploads: 0,
            max_concurrent_publishes: 1,
        };
        assert!(matches!(settings.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_cli_path_wins() {
        let path = PathBuf::from("/tmp/explicit.toml");
        assert_eq!(resolve_config_path(Some(&path)), Some(path));
    }
}
