//! Image handling infrastructure.
//!
//! This module provides:
//! - Memory tier with LRU eviction
//! - Disk tier for persistence
//! - HTTP fetcher
//! - The cache service tying them together

pub mod cache;
pub mod disk_cache;
pub mod fetcher;
pub mod memory_cache;

pub use cache::{DEFAULT_MAX_CONCURRENT_DOWNLOADS, ImageCache, ImageCacheConfig};
pub use disk_cache::{DEFAULT_JPEG_QUALITY, DiskImageCache, default_cache_dir};
pub use fetcher::{DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENT, HttpImageFetcher};
pub use memory_cache::{CacheStats, DEFAULT_MEMORY_CAPACITY, MemoryImageCache};
