//! Application configuration.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::args::CliArgs;
use crate::infrastructure::image::{
    DEFAULT_JPEG_QUALITY, DEFAULT_MAX_CONCURRENT_DOWNLOADS, DEFAULT_MEMORY_CAPACITY,
    DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT, ImageCacheConfig, default_cache_dir,
};

pub(crate) const APP_NAME: &str = "figcache";
pub(crate) const APP_QUALIFIER: &str = "com";
pub(crate) const APP_ORGANIZATION: &str = "figcache";

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Application configuration, read from `config.toml` and overridden by CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Log file path.
    #[serde(default)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Cache tier settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Network fetch settings.
    #[serde(default)]
    pub network: NetworkConfig,
}

/// Cache tier configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Disk tier directory. Defaults to the platform cache directory.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Maximum number of decoded images kept in memory.
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,

    /// JPEG quality (1-100) of disk entries.
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            memory_capacity: default_memory_capacity(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum simultaneous downloads.
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,

    /// User-Agent header sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_concurrent_downloads: default_max_concurrent_downloads(),
            user_agent: default_user_agent(),
        }
    }
}

const fn default_memory_capacity() -> usize {
    DEFAULT_MEMORY_CAPACITY
}

const fn default_jpeg_quality() -> u8 {
    DEFAULT_JPEG_QUALITY
}

const fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

const fn default_max_concurrent_downloads() -> usize {
    DEFAULT_MAX_CONCURRENT_DOWNLOADS
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

impl AppConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(cache_dir) = &args.cache_dir {
            self.cache.cache_dir = Some(cache_dir.clone());
        }
        if let Some(memory_capacity) = args.memory_capacity {
            self.cache.memory_capacity = memory_capacity;
        }
        if let Some(jpeg_quality) = args.jpeg_quality {
            self.cache.jpeg_quality = jpeg_quality;
        }
        if let Some(timeout_secs) = args.timeout_secs {
            self.network.timeout_secs = timeout_secs;
        }
        if let Some(max_concurrent_downloads) = args.max_concurrent_downloads {
            self.network.max_concurrent_downloads = max_concurrent_downloads;
        }
    }

    /// Runtime settings for the image cache.
    #[must_use]
    pub fn image_cache_config(&self) -> ImageCacheConfig {
        ImageCacheConfig {
            cache_dir: self
                .cache
                .cache_dir
                .clone()
                .unwrap_or_else(default_cache_dir),
            memory_capacity: self.cache.memory_capacity,
            jpeg_quality: self.cache.jpeg_quality.clamp(1, 100),
            max_concurrent_downloads: self.network.max_concurrent_downloads.max(1),
        }
    }

    /// Returns default log file path.
    #[must_use]
    pub fn default_log_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.data_dir().join("figcache.log"))
    }

    /// Returns effective log path.
    #[must_use]
    pub fn effective_log_path(&self) -> Option<PathBuf> {
        self.log_path.clone().or_else(Self::default_log_path)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_path: None,
            log_level: LogLevel::Info,
            cache: CacheConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}
