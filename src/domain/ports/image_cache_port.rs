//! Port definitions for the image tiers and the network fetcher.

use std::sync::Arc;

use bytes::Bytes;

use crate::domain::entities::CacheKey;

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors that can occur during cache operations.
///
/// None of these reach the consumer of `get_image`; they are logged and
/// collapsed to an absent image.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// Entry not present.
    #[error("Image not found: {0}")]
    NotFound(String),
    /// Bytes could not be interpreted as an image.
    #[error("Decode error: {0}")]
    DecodeError(String),
    /// I/O error during a disk tier operation.
    #[error("IO error: {0}")]
    IoError(String),
    /// Error during download.
    #[error("Network error: {0}")]
    NetworkError(String),
    /// Blank or unparseable URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Port for the in-memory image tier.
/// Implementations must be thread-safe.
#[async_trait::async_trait]
pub trait ImageCachePort: Send + Sync {
    /// Attempts to get an image from the cache.
    /// Returns None if not cached.
    async fn get(&self, key: &CacheKey) -> Option<Arc<image::DynamicImage>>;

    /// Stores an image in the cache.
    async fn put(&self, key: CacheKey, image: Arc<image::DynamicImage>);

    /// Removes an image from the cache.
    async fn evict(&self, key: &CacheKey);

    /// Returns the current number of cached images.
    fn len(&self) -> usize;

    /// Returns true if the cache is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears all images from the cache.
    async fn clear(&self);
}

/// Port for retrieving raw encoded image bytes on a full cache miss.
#[async_trait::async_trait]
pub trait ImageFetcherPort: Send + Sync {
    /// Downloads the bytes behind `url`.
    async fn fetch(&self, url: &str) -> CacheResult<Bytes>;
}
