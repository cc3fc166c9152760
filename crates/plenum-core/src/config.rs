//! Project configuration.
//!
//! Looked up in `--config PATH`, then `<project>/.plenum/config.toml`, then
//! `<user config dir>/plenum/config.toml`. Missing files yield defaults.
//!
//! ```toml
//! [checker]
//! mode = "internal"
//! migration_mode = "strict"
//! repair = false
//!
//! [checker.fields_to_remove]
//! user = ["legacy_field"]
//!
//! [migration]
//! lock_timeout_ms = 5000
//!
//! [registry]
//! models = "models.yml"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::checker::CheckerConfig;
use crate::migration::DEFAULT_LOCK_TIMEOUT;

pub const PROJECT_CONFIG: &str = ".plenum/config.toml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub checker: CheckerConfig,
    #[serde(default)]
    pub migration: MigrationConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationConfig {
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl MigrationConfig {
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Model declarations replacing the built-in ones. Relative paths are
    /// resolved against the directory of the config file.
    #[serde(default)]
    pub models: Option<PathBuf>,
}

/// Load `path`, or defaults if it does not exist.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config_file(path: &Path) -> Result<ProjectConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(ProjectConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut config = toml::from_str::<ProjectConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    if let Some(models) = &config.registry.models
        && models.is_relative()
        && let Some(dir) = path.parent()
    {
        config.registry.models = Some(dir.join(models));
    }
    tracing::debug!(path = %path.display(), "config loaded");
    Ok(config)
}

/// Resolve the effective configuration for `project_root`.
///
/// # Errors
///
/// Returns an error if the selected file cannot be read or parsed.
pub fn load_config(explicit: Option<&Path>, project_root: &Path) -> Result<ProjectConfig> {
    if let Some(path) = explicit {
        if !path.exists() {
            anyhow::bail!("Config file {} does not exist", path.display());
        }
        return load_config_file(path);
    }
    let project = project_root.join(PROJECT_CONFIG);
    if project.exists() {
        return load_config_file(&project);
    }
    match user_config_path() {
        Some(user) => load_config_file(&user),
        None => Ok(ProjectConfig::default()),
    }
}

#[must_use]
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("plenum/config.toml"))
}

const fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT.as_secs() * 1_000
}
