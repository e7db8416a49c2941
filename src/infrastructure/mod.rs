//! Infrastructure layer with external service adapters.

/// Application configuration.
pub mod config;
/// Image handling (memory tier, disk tier, network fetcher, cache service).
pub mod image;

pub use config::{AppConfig, CliArgs, Command, ConfigError, ConfigStore, LogLevel};
pub use image::{
    CacheStats, DiskImageCache, HttpImageFetcher, ImageCache, ImageCacheConfig, MemoryImageCache,
};
