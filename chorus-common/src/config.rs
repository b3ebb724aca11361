//! Bootstrap configuration file discovery and loading
//!
//! Config file resolution follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. User config directory (`~/.config/<app>/config.toml`)
//! 4. System config (`/etc/<app>/config.toml`, unix only)
//! 5. No file: caller falls back to built-in defaults
//!
//! A missing config file is never fatal. A config file that exists but does
//! not parse is.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Where the active configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    CommandLine(PathBuf),
    Environment(PathBuf),
    UserConfig(PathBuf),
    SystemConfig(PathBuf),
    Defaults,
}

impl ConfigSource {
    /// Path of the file backing this source, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::CommandLine(p)
            | ConfigSource::Environment(p)
            | ConfigSource::UserConfig(p)
            | ConfigSource::SystemConfig(p) => Some(p),
            ConfigSource::Defaults => None,
        }
    }
}

/// Resolves the config file for one application
#[derive(Debug, Clone)]
pub struct ConfigLocator {
    app_name: String,
    env_var: String,
}

impl ConfigLocator {
    /// `app_name` names the config directory; `env_var` overrides the path
    pub fn new(app_name: impl Into<String>, env_var: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            env_var: env_var.into(),
        }
    }

    /// Find the config file to use
    ///
    /// Explicit paths (CLI, environment) are returned even if the file does
    /// not exist so that the load step can report it; discovered locations
    /// are only returned when present.
    pub fn locate(&self, cli_arg: Option<&Path>) -> ConfigSource {
        if let Some(path) = cli_arg {
            return ConfigSource::CommandLine(path.to_path_buf());
        }

        if let Ok(path) = std::env::var(&self.env_var) {
            if !path.trim().is_empty() {
                return ConfigSource::Environment(PathBuf::from(path));
            }
        }

        if let Some(user) = self.user_config_path() {
            if user.exists() {
                return ConfigSource::UserConfig(user);
            }
        }

        #[cfg(unix)]
        {
            let system = PathBuf::from("/etc").join(&self.app_name).join("config.toml");
            if system.exists() {
                return ConfigSource::SystemConfig(system);
            }
        }

        ConfigSource::Defaults
    }

    /// `~/.config/<app>/config.toml` (platform equivalent elsewhere)
    pub fn user_config_path(&self) -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(&self.app_name).join("config.toml"))
    }

    /// Locate and parse the configuration, falling back to `T::default()`
    pub fn load<T>(&self, cli_arg: Option<&Path>) -> Result<(T, ConfigSource)>
    where
        T: DeserializeOwned + Default,
    {
        let source = self.locate(cli_arg);
        let config = match source.path() {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::Config(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                info!("Loading configuration from {}", path.display());
                load_toml_file(path)?
            }
            None => {
                warn!("No configuration file found, using built-in defaults");
                T::default()
            }
        };
        Ok((config, source))
    }
}

/// Parse a TOML file into `T`
pub fn load_toml_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    debug!("Read {} bytes of configuration", content.len());
    parse_toml(&content)
}

/// Parse TOML text into `T`
pub fn parse_toml<T: DeserializeOwned>(content: &str) -> Result<T> {
    Ok(toml::from_str(content)?)
}
