//! Configuration file resolution and bootstrap TOML loading
//!
//! The config file is optional. Resolution follows a fixed priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user config directory (`<config dir>/avsync/config.toml`)
//! 4. None: built-in defaults are used
//!
//! A missing or unreadable file never terminates the process: callers get a
//! warning in the log and a default [`TomlConfig`].

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable consulted when no CLI path is given
pub const CONFIG_ENV_VAR: &str = "AVSYNC_CONFIG";

/// Directory name under the platform config dir
const APP_DIR: &str = "avsync";

/// Logging section of the config file
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset (e.g. "info", "avsync_core=debug")
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Bootstrap configuration read from TOML
///
/// The `[player]` table is kept as raw TOML so that each crate can
/// deserialize its own option struct out of it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub logging: LoggingConfig,
    pub player: toml::Table,
}

impl TomlConfig {
    /// Parse a TOML document
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read and parse a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Deserialize the `[player]` table into a caller-defined struct
    pub fn player_section<T>(&self) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        toml::Value::Table(self.player.clone())
            .try_into()
            .map_err(|e: toml::de::Error| Error::Config(format!("[player]: {}", e)))
    }
}

/// Resolve which config file to load, if any.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Per-user config directory
    default_config_path().filter(|p| p.exists())
}

/// Platform config file location (`~/.config/avsync/config.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
}

/// Load the resolved config file, degrading to defaults on any failure
pub fn load_or_default(cli_arg: Option<&Path>, env_var_name: &str) -> TomlConfig {
    let Some(path) = resolve_config_path(cli_arg, env_var_name) else {
        info!("No config file found, using built-in defaults");
        return TomlConfig::default();
    };

    match TomlConfig::from_file(&path) {
        Ok(config) => {
            info!("Loaded config from {}", path.display());
            config
        }
        Err(e) => {
            warn!(
                "Failed to load config {} ({}), using built-in defaults",
                path.display(),
                e
            );
            TomlConfig::default()
        }
    }
}
