//! In-memory LRU image tier.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::CacheKey;
use crate::domain::ports::ImageCachePort;

/// Default maximum number of images held in memory.
pub const DEFAULT_MEMORY_CAPACITY: usize = 50;

/// Bounded least-recently-used map of decoded images.
/// Thread-safe; the lock is never held across an await, so `len` is exact.
pub struct MemoryImageCache {
    cache: Mutex<LruCache<CacheKey, Arc<image::DynamicImage>>>,
    capacity: NonZeroUsize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryImageCache {
    /// Creates a new cache with the specified capacity (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(cap)),
            capacity: cap,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Maximum number of entries.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        CacheStats {
            hits,
            misses,
            hit_rate,
            size: self.len(),
        }
    }

    /// Peeks at an image without promoting it in the LRU or touching stats.
    pub fn peek(&self, key: &CacheKey) -> Option<Arc<image::DynamicImage>> {
        self.cache.lock().peek(key).cloned()
    }
}

/// Statistics about memory tier performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached images.
    pub size: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images, {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.hit_rate, self.hits, self.misses
        )
    }
}

#[async_trait::async_trait]
impl ImageCachePort for MemoryImageCache {
    async fn get(&self, key: &CacheKey) -> Option<Arc<image::DynamicImage>> {
        let mut cache = self.cache.lock();
        if let Some(img) = cache.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache hit");
            Some(img.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache miss");
            None
        }
    }

    async fn put(&self, key: CacheKey, image: Arc<image::DynamicImage>) {
        let mut cache = self.cache.lock();
        if let Some((evicted, _)) = cache.push(key.clone(), image)
            && evicted != key
        {
            debug!(key = %evicted, "Memory cache full, evicted least recently used");
        }
        trace!(key = %key, size = cache.len(), "Stored image in memory cache");
    }

    async fn evict(&self, key: &CacheKey) {
        let mut cache = self.cache.lock();
        if cache.pop(key).is_some() {
            debug!(key = %key, "Evicted image from memory cache");
        }
    }

    fn len(&self) -> usize {
        self.cache.lock().len()
    }

    async fn clear(&self) {
        let mut cache = self.cache.lock();
        cache.clear();
        debug!("Cleared memory image cache");
    }
}
