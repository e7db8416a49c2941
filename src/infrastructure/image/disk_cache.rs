//! Disk-based image tier for persistence across sessions.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use tokio::fs;
use tracing::{debug, error, trace, warn};

use crate::domain::entities::CacheKey;
use crate::domain::ports::{CacheError, CacheResult};

/// Default JPEG quality for stored entries.
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Extension of every entry file.
const ENTRY_EXTENSION: &str = "jpg";

/// Disk tier: one JPEG file per cache key, no manifest.
#[derive(Debug)]
pub struct DiskImageCache {
    cache_dir: PathBuf,
    jpeg_quality: u8,
}

impl DiskImageCache {
    /// Creates a disk tier rooted at `cache_dir`, creating the directory.
    ///
    /// # Errors
    /// Returns error if the cache directory cannot be created.
    pub async fn new(cache_dir: PathBuf, jpeg_quality: u8) -> CacheResult<Self> {
        fs::create_dir_all(&cache_dir)
            .await
            .map_err(|e| CacheError::IoError(format!("Failed to create cache dir: {e}")))?;

        let cache = Self {
            cache_dir,
            jpeg_quality: jpeg_quality.clamp(1, 100),
        };
        debug!(dir = %cache.cache_dir.display(), quality = cache.jpeg_quality, "Disk cache ready");
        Ok(cache)
    }

    /// Directory holding the entries.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns the file path for a key. The file may not exist.
    #[must_use]
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{ENTRY_EXTENSION}", key.as_str()))
    }

    /// Loads and decodes an entry.
    ///
    /// A file that cannot be decoded is deleted so it is not read again.
    ///
    /// # Errors
    /// `NotFound` when absent, `DecodeError` for corrupt files, `IoError`
    /// for other read failures.
    pub async fn get(&self, key: &CacheKey) -> CacheResult<Arc<image::DynamicImage>> {
        let path = self.entry_path(key);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!(key = %key, "Disk cache miss");
                return Err(CacheError::NotFound(key.to_string()));
            }
            Err(e) => {
                return Err(CacheError::IoError(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };
        trace!(key = %key, path = %path.display(), size = bytes.len(), "Disk cache hit");

        let result = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes)).await;

        match result {
            Ok(Ok(img)) => {
                debug!(key = %key, "Decoded image from disk cache");
                Ok(Arc::new(img))
            }
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "Corrupt disk cache entry, removing");
                self.evict(key).await;
                Err(CacheError::DecodeError(e.to_string()))
            }
            Err(e) => {
                error!(key = %key, error = %e, "Decode task panicked");
                Err(CacheError::DecodeError(format!("Decode task panicked: {e}")))
            }
        }
    }

    /// Encodes `image` as JPEG and stores it under `key`, replacing any
    /// existing entry. Returns the number of bytes written.
    ///
    /// The data is written to a temporary file in the cache directory and
    /// renamed into place, so readers see either the old or the new file.
    ///
    /// # Errors
    /// Returns error if encoding fails or the file cannot be written.
    pub async fn put(&self, key: &CacheKey, image: Arc<image::DynamicImage>) -> CacheResult<u64> {
        let path = self.entry_path(key);
        let dir = self.cache_dir.clone();
        let quality = self.jpeg_quality;

        let written = tokio::task::spawn_blocking(move || write_jpeg(&dir, &path, &image, quality))
            .await
            .map_err(|e| CacheError::IoError(format!("Write task panicked: {e}")))??;

        debug!(key = %key, size = written, "Stored image in disk cache");
        Ok(written)
    }

    /// Removes an entry. Returns true if a file was deleted.
    pub async fn evict(&self, key: &CacheKey) -> bool {
        let path = self.entry_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key = %key, "Evicted from disk cache");
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to evict from disk cache");
                false
            }
        }
    }

    /// Deletes the cache directory and recreates it empty.
    /// A directory that does not exist yet is not an error.
    ///
    /// # Errors
    /// Returns error if the directory cannot be removed or recreated.
    pub async fn clear(&self) -> CacheResult<()> {
        if let Err(e) = fs::remove_dir_all(&self.cache_dir).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            return Err(CacheError::IoError(format!(
                "Failed to remove cache dir: {e}"
            )));
        }
        fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| CacheError::IoError(format!("Failed to recreate cache dir: {e}")))?;
        debug!(dir = %self.cache_dir.display(), "Cleared disk cache");
        Ok(())
    }

    /// Total size in bytes of all entry files. Zero if the directory is missing.
    pub async fn size_bytes(&self) -> u64 {
        self.scan().await.iter().map(|(_, size)| size).sum()
    }

    /// Number of entry files.
    pub async fn len(&self) -> usize {
        self.scan().await.len()
    }

    /// Returns true if the tier holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Checks if an entry file exists.
    pub async fn contains(&self, key: &CacheKey) -> bool {
        fs::try_exists(self.entry_path(key)).await.unwrap_or(false)
    }

    async fn scan(&self) -> Vec<(PathBuf, u64)> {
        let mut files = Vec::new();
        let Ok(mut entries) = fs::read_dir(&self.cache_dir).await else {
            return files;
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != ENTRY_EXTENSION) {
                continue;
            }
            if let Ok(meta) = entry.metadata().await
                && meta.is_file()
            {
                files.push((path, meta.len()));
            }
        }
        files
    }
}

fn write_jpeg(dir: &Path, path: &Path, image: &image::DynamicImage, quality: u8) -> CacheResult<u64> {
    let mut encoded = Vec::new();
    image
        .to_rgb8()
        .write_with_encoder(JpegEncoder::new_with_quality(&mut encoded, quality))
        .map_err(|e| CacheError::DecodeError(format!("Failed to encode JPEG: {e}")))?;

    std::fs::create_dir_all(dir)
        .map_err(|e| CacheError::IoError(format!("Failed to create cache dir: {e}")))?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| CacheError::IoError(format!("Failed to create temp file: {e}")))?;
    temp.write_all(&encoded)
        .map_err(|e| CacheError::IoError(format!("Failed to write cache file: {e}")))?;
    temp.persist(path)
        .map_err(|e| CacheError::IoError(format!("Failed to persist cache file: {}", e.error)))?;

    Ok(encoded.len() as u64)
}

/// Returns the default cache directory path.
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "figcache", "figcache").map_or_else(
        || {
            std::env::temp_dir()
                .join("figcache")
                .join("cache")
                .join("images")
        },
        |dirs| dirs.cache_dir().join("images"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_cache() -> (DiskImageCache, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let cache = DiskImageCache::new(temp_dir.path().join("images"), DEFAULT_JPEG_QUALITY)
            .await
            .unwrap();
        (cache, temp_dir)
    }

    fn key(name: &str) -> CacheKey {
        CacheKey::from_url(&format!("https://example.com/{name}.jpg"))
    }

    fn sample(width: u32, height: u32) -> Arc<image::DynamicImage> {
        Arc::new(image::DynamicImage::new_rgba8(width, height))
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (cache, _temp) = create_test_cache().await;
        let id = key("test1");

        let written = cache.put(&id, sample(32, 16)).await.unwrap();
        assert!(written > 0);

        let img = cache.get(&id).await.unwrap();
        assert_eq!((img.width(), img.height()), (32, 16));
    }

    #[tokio::test]
    async fn test_entry_is_jpeg_named_by_key() {
        let (cache, _temp) = create_test_cache().await;
        let id = key("batman");
        cache.put(&id, sample(8, 8)).await.unwrap();

        let path = cache.entry_path(&id);
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            format!("{id}.jpg")
        );
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), image::ImageFormat::Jpeg);
    }

    #[tokio::test]
    async fn test_cache_miss() {
        let (cache, _temp) = create_test_cache().await;

        let result = cache.get(&key("nonexistent")).await;
        assert!(matches!(result, Err(CacheError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_removed() {
        let (cache, _temp) = create_test_cache().await;
        let id = key("corrupt");
        std::fs::write(cache.entry_path(&id), b"\xFF\xD8\xFF truncated").unwrap();

        let result = cache.get(&id).await;
        assert!(matches!(result, Err(CacheError::DecodeError(_))));
        assert!(!cache.contains(&id).await);
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let (cache, _temp) = create_test_cache().await;
        let id = key("fig");

        cache.put(&id, sample(4, 4)).await.unwrap();
        cache.put(&id, sample(9, 3)).await.unwrap();

        assert_eq!(cache.len().await, 1);
        let img = cache.get(&id).await.unwrap();
        assert_eq!((img.width(), img.height()), (9, 3));
    }

    #[tokio::test]
    async fn test_evict() {
        let (cache, _temp) = create_test_cache().await;
        let id = key("test1");

        cache.put(&id, sample(2, 2)).await.unwrap();
        assert!(cache.contains(&id).await);

        assert!(cache.evict(&id).await);
        assert!(!cache.contains(&id).await);
        assert!(!cache.evict(&id).await);
    }

    #[tokio::test]
    async fn test_size_bytes_counts_entries_only() {
        let (cache, _temp) = create_test_cache().await;

        let a = cache.put(&key("a"), sample(16, 16)).await.unwrap();
        let b = cache.put(&key("b"), sample(8, 8)).await.unwrap();
        std::fs::write(cache.cache_dir().join("stray.txt"), b"ignored").unwrap();

        assert_eq!(cache.size_bytes().await, a + b);
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_clear() {
        let (cache, _temp) = create_test_cache().await;

        cache.put(&key("test1"), sample(2, 2)).await.unwrap();
        cache.put(&key("test2"), sample(2, 2)).await.unwrap();
        assert_eq!(cache.len().await, 2);

        cache.clear().await.unwrap();
        assert!(cache.is_empty().await);
        assert_eq!(cache.size_bytes().await, 0);
        assert!(cache.cache_dir().is_dir());
    }

    #[tokio::test]
    async fn test_clear_tolerates_missing_dir() {
        let (cache, _temp) = create_test_cache().await;
        std::fs::remove_dir_all(cache.cache_dir()).unwrap();

        assert_eq!(cache.size_bytes().await, 0);
        cache.clear().await.unwrap();
        assert!(cache.cache_dir().is_dir());
    }

    #[tokio::test]
    async fn test_put_recreates_missing_dir() {
        let (cache, _temp) = create_test_cache().await;
        std::fs::remove_dir_all(cache.cache_dir()).unwrap();

        cache.put(&key("late"), sample(2, 2)).await.unwrap();
        assert!(cache.contains(&key("late")).await);
    }

    #[tokio::test]
    async fn test_quality_is_clamped() {
        let temp_dir = TempDir::new().unwrap();
        let cache = DiskImageCache::new(temp_dir.path().to_path_buf(), 0)
            .await
            .unwrap();
        cache.put(&key("q"), sample(4, 4)).await.unwrap();
        assert_eq!(cache.len().await, 1);
    }
}
