//! Location and persistence of `config.toml`.

use std::io::Write;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use thiserror::Error;
use tracing::{info, warn};

use super::app_config::{APP_NAME, APP_ORGANIZATION, APP_QUALIFIER, AppConfig};

const CONFIG_FILE_NAME: &str = "config.toml";

/// Errors raised while locating or writing the config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform exposes no config directory and no path was given.
    #[error("no config directory available on this platform")]
    NoConfigDir,
    /// Filesystem failure.
    #[error("config file io error: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration could not be rendered as TOML.
    #[error("config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// A single `config.toml` on disk.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Uses `path_override` when given, else `config.toml` in the platform
    /// config directory.
    ///
    /// # Errors
    /// Returns [`ConfigError::NoConfigDir`] if there is no override and the
    /// platform has no config directory.
    pub fn locate(path_override: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path_override {
            return Ok(Self::at(path.to_path_buf()));
        }
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| Self::at(dirs.config_dir().join(CONFIG_FILE_NAME)))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Store backed by exactly `path`.
    #[must_use]
    pub const fn at(path: PathBuf) -> Self {
        Self { path }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the file, writing the defaults first if it does not exist.
    /// An unparseable file is kept as is and the defaults are returned.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or the defaults cannot be
    /// written.
    pub fn load_or_create(&self) -> Result<AppConfig, ConfigError> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "No config file, writing defaults");
            let config = AppConfig::default();
            self.save(&config)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&self.path)?;
        Ok(toml::from_str(&content).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "Invalid config file, using defaults");
            AppConfig::default()
        }))
    }

    /// Replaces the file atomically with `config`.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created or the file written.
    pub fn save(&self, config: &AppConfig) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(config)?;
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut staged = tempfile::NamedTempFile::new_in(dir)?;
        staged.write_all(content.as_bytes())?;
        staged.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}
