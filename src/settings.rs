//! Settings file and config directory resolution
//!
//! # Path Resolution Priority
//!
//! 1. `NAASCTL_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/naasctl` (if set)
//! 3. `~/.config/naasctl`
//!
//! Command-line flags (and their `GRAPHIANT_*` environment variables) always
//! win over the settings file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "NAASCTL_CONFIG_DIR";

const SETTINGS_FILE: &str = "config.toml";

/// Get the naasctl config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand_path(&dir);
        log::debug!("Using config dir from {ENV_CONFIG_DIR}: {}", path.display());
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        return Ok(PathBuf::from(xdg_config).join("naasctl"));
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("naasctl"))
}

/// Expand `~` and environment variables in a path; unknown variables are
/// left as written
pub fn expand_path(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

/// Contents of `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Portal host
    pub host: Option<String>,
    /// Portal username
    pub username: Option<String>,
    /// Concurrent pushes
    pub jobs: Option<usize>,
    /// Base directory for relative document paths
    pub config_path: Option<String>,
}

impl Settings {
    /// Path of the settings file
    pub fn path() -> Result<PathBuf> {
        Ok(config_dir()?.join(SETTINGS_FILE))
    }

    /// Load settings; a missing file means defaults
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read settings file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Invalid TOML format in {}", path.display()))
    }

    /// Resolve a document path against `config_path` when it is relative
    pub fn resolve_document(&self, file: &Path) -> PathBuf {
        let file = expand_path(&file.to_string_lossy());
        match &self.config_path {
            Some(base) if file.is_relative() => expand_path(base).join(file),
            _ => file,
        }
    }
}
