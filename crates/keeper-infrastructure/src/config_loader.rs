//! Enablement configuration loading.
//!
//! The hosting application supplies the field-enablement configuration as a
//! TOML file. A missing or empty file yields the empty (fully lenient)
//! configuration; a malformed file is an error.

use std::path::{Path, PathBuf};

use keeper_core::error::{KeeperError, Result};
use keeper_core::merge::EnablementConfig;

/// Loads the enablement configuration from `path`.
///
/// # Returns
///
/// - `Ok(EnablementConfig)`: parsed configuration, or the empty default
///   when the file does not exist or is empty.
/// - `Err(_)`: the file exists but cannot be read or parsed.
pub fn load_enablement(path: impl AsRef<Path>) -> Result<EnablementConfig> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(EnablementConfig::default());
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        KeeperError::config(format!("failed to read config file at {:?}: {}", path, e))
    })?;

    if content.trim().is_empty() {
        return Ok(EnablementConfig::default());
    }

    Ok(toml::from_str(&content)?)
}

/// The default configuration file path (`~/.config/keeper/panels.toml`).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("keeper").join("panels.toml"))
}
