//! Two-tier image cache orchestrator.
//!
//! Resolves a URL through Memory -> Disk -> Network, populating both tiers on
//! a network hit. Concurrent misses for the same key share one fetch task.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::{debug, info, trace, warn};

use crate::domain::entities::{CacheKey, ImageSource, LoadedImage};
use crate::domain::ports::{CacheError, CacheResult, ImageCachePort, ImageFetcherPort};

use super::disk_cache::{DEFAULT_JPEG_QUALITY, DiskImageCache, default_cache_dir};
use super::memory_cache::{CacheStats, DEFAULT_MEMORY_CAPACITY, MemoryImageCache};

/// Default number of simultaneous network fetches.
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 4;

/// Configuration for the image cache.
#[derive(Debug, Clone)]
pub struct ImageCacheConfig {
    /// Directory of the disk tier.
    pub cache_dir: PathBuf,
    /// Maximum images in the memory tier.
    pub memory_capacity: usize,
    /// JPEG quality of disk entries.
    pub jpeg_quality: u8,
    /// Maximum concurrent network fetches.
    pub max_concurrent_downloads: usize,
}

impl Default for ImageCacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
        }
    }
}

type FlightResult = CacheResult<(Arc<image::DynamicImage>, ImageSource)>;
type SharedFlight = Shared<BoxFuture<'static, FlightResult>>;

/// A miss being resolved by a spawned task.
struct InFlight {
    id: u64,
    detached: Arc<AtomicBool>,
    result: SharedFlight,
}

/// Shared image cache service.
///
/// Cloning is cheap and every clone drives the same tiers; construct one at
/// startup and hand clones to consumers.
#[derive(Clone)]
pub struct ImageCache {
    memory_cache: Arc<MemoryImageCache>,
    disk_cache: Arc<DiskImageCache>,
    fetcher: Arc<dyn ImageFetcherPort>,
    in_flight: Arc<Mutex<HashMap<CacheKey, InFlight>>>,
    next_flight_id: Arc<AtomicU64>,
    semaphore: Arc<Semaphore>,
    network_fetches: Arc<AtomicU64>,
}

impl std::fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCache")
            .field("cache_dir", &self.disk_cache.cache_dir())
            .field("memory_capacity", &self.memory_cache.capacity())
            .finish_non_exhaustive()
    }
}

impl ImageCache {
    /// Creates a cache from configuration and a fetcher.
    ///
    /// # Errors
    /// Returns error if the disk tier directory cannot be created.
    pub async fn new(
        config: &ImageCacheConfig,
        fetcher: Arc<dyn ImageFetcherPort>,
    ) -> CacheResult<Self> {
        let disk_cache = DiskImageCache::new(config.cache_dir.clone(), config.jpeg_quality).await?;
        Ok(Self::with_tiers(
            Arc::new(MemoryImageCache::new(config.memory_capacity)),
            Arc::new(disk_cache),
            fetcher,
            config.max_concurrent_downloads,
        ))
    }

    /// Assembles a cache from existing tiers.
    #[must_use]
    pub fn with_tiers(
        memory_cache: Arc<MemoryImageCache>,
        disk_cache: Arc<DiskImageCache>,
        fetcher: Arc<dyn ImageFetcherPort>,
        max_concurrent_downloads: usize,
    ) -> Self {
        Self {
            memory_cache,
            disk_cache,
            fetcher,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_flight_id: Arc::new(AtomicU64::new(0)),
            semaphore: Arc::new(Semaphore::new(max_concurrent_downloads.max(1))),
            network_fetches: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns the image for `url`, or `None` if it cannot be obtained.
    ///
    /// Every failure is logged and collapsed to `None`; nothing is cached for
    /// a failed request, so the next call tries the network again.
    pub async fn get_image(&self, url: &str) -> Option<Arc<image::DynamicImage>> {
        match self.load(url).await {
            Ok(loaded) => Some(loaded.image),
            Err(e) => {
                warn!(url = %url, error = %e, "Image unavailable");
                None
            }
        }
    }

    /// Resolves `url` through the tiers, reporting where the image came from.
    ///
    /// # Errors
    /// Returns the error of the failed stage: invalid URL, network or decode.
    pub async fn load(&self, url: &str) -> CacheResult<LoadedImage> {
        validate_url(url)?;
        let key = CacheKey::from_url(url);

        if let Some(image) = self.memory_cache.get(&key).await {
            return Ok(LoadedImage {
                key,
                image,
                source: ImageSource::MemoryCache,
            });
        }

        let (image, source) = self.join_flight(&key, url).await?;
        debug!(key = %key, source = %source, "Image loaded");
        Ok(LoadedImage { key, image, source })
    }

    /// Removes any memory and disk entry for `url`.
    ///
    /// A fetch already in flight for the key still answers its waiters but no
    /// longer writes its result into the tiers.
    pub async fn invalidate(&self, url: &str) {
        let key = CacheKey::from_url(url);
        if let Some(flight) = self.in_flight.lock().remove(&key) {
            flight.detached.store(true, Ordering::SeqCst);
            debug!(key = %key, "Detached in-flight fetch");
        }
        self.memory_cache.evict(&key).await;
        self.disk_cache.evict(&key).await;
        debug!(key = %key, url = %url, "Invalidated image");
    }

    /// Drops the memory tier and recreates the disk tier empty.
    pub async fn clear_cache(&self) {
        let detached: Vec<InFlight> = {
            let mut in_flight = self.in_flight.lock();
            in_flight.drain().map(|(_, flight)| flight).collect()
        };
        for flight in &detached {
            flight.detached.store(true, Ordering::SeqCst);
        }

        self.memory_cache.clear().await;
        if let Err(e) = self.disk_cache.clear().await {
            warn!(error = %e, "Failed to clear disk cache");
        }
        info!(detached = detached.len(), "Cleared all image caches");
    }

    /// Total bytes held by the disk tier.
    pub async fn cache_size_bytes(&self) -> u64 {
        self.disk_cache.size_bytes().await
    }

    /// Warms both tiers for `urls` in the background.
    ///
    /// The returned handle yields how many URLs resolved; dropping it does
    /// not stop the prefetch.
    pub fn prefetch<I>(&self, urls: I) -> tokio::task::JoinHandle<usize>
    where
        I: IntoIterator<Item = String>,
    {
        let urls: Vec<String> = urls.into_iter().collect();
        let cache = self.clone();
        tokio::spawn(async move {
            let total = urls.len();
            let loads = urls.iter().map(|url| cache.get_image(url));
            let loaded = futures_util::future::join_all(loads)
                .await
                .into_iter()
                .filter(Option::is_some)
                .count();
            debug!(total, loaded, "Prefetch complete");
            loaded
        })
    }

    /// Returns true while a miss for `url` is being resolved.
    #[must_use]
    pub fn is_loading(&self, url: &str) -> bool {
        self.in_flight.lock().contains_key(&CacheKey::from_url(url))
    }

    /// Returns the number of misses being resolved.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Number of network fetches issued since construction.
    #[must_use]
    pub fn network_fetch_count(&self) -> u64 {
        self.network_fetches.load(Ordering::Relaxed)
    }

    /// Returns memory tier statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.memory_cache.stats()
    }

    /// The memory tier.
    #[must_use]
    pub fn memory(&self) -> &MemoryImageCache {
        &self.memory_cache
    }

    /// The disk tier.
    #[must_use]
    pub fn disk(&self) -> &DiskImageCache {
        &self.disk_cache
    }

    /// Awaits the in-flight resolution for `key`, starting one if needed.
    async fn join_flight(&self, key: &CacheKey, url: &str) -> FlightResult {
        let result = {
            let mut in_flight = self.in_flight.lock();
            if let Some(flight) = in_flight.get(key) {
                trace!(key = %key, "Joining in-flight fetch");
                flight.result.clone()
            } else {
                let id = self.next_flight_id.fetch_add(1, Ordering::Relaxed);
                let detached = Arc::new(AtomicBool::new(false));
                let task = FetchTask {
                    memory_cache: self.memory_cache.clone(),
                    disk_cache: self.disk_cache.clone(),
                    fetcher: self.fetcher.clone(),
                    in_flight: self.in_flight.clone(),
                    semaphore: self.semaphore.clone(),
                    network_fetches: self.network_fetches.clone(),
                };
                let handle = tokio::spawn(task.run(
                    key.clone(),
                    url.to_string(),
                    id,
                    detached.clone(),
                ));
                let result = handle
                    .map(|joined| {
                        joined.unwrap_or_else(|e| {
                            Err(CacheError::IoError(format!("Fetch task failed: {e}")))
                        })
                    })
                    .boxed()
                    .shared();
                in_flight.insert(
                    key.clone(),
                    InFlight {
                        id,
                        detached,
                        result: result.clone(),
                    },
                );
                result
            }
        };
        result.await
    }
}

/// Everything a spawned miss resolution needs.
struct FetchTask {
    memory_cache: Arc<MemoryImageCache>,
    disk_cache: Arc<DiskImageCache>,
    fetcher: Arc<dyn ImageFetcherPort>,
    in_flight: Arc<Mutex<HashMap<CacheKey, InFlight>>>,
    semaphore: Arc<Semaphore>,
    network_fetches: Arc<AtomicU64>,
}

impl FetchTask {
    async fn run(
        self,
        key: CacheKey,
        url: String,
        id: u64,
        detached: Arc<AtomicBool>,
    ) -> FlightResult {
        let result = self.resolve(&key, &url, &detached).await;

        let mut in_flight = self.in_flight.lock();
        if in_flight.get(&key).is_some_and(|flight| flight.id == id) {
            in_flight.remove(&key);
        }
        drop(in_flight);

        result
    }

    async fn resolve(&self, key: &CacheKey, url: &str, detached: &AtomicBool) -> FlightResult {
        // A previous flight may have filled memory after our caller checked it.
        if let Some(image) = self.memory_cache.peek(key) {
            return Ok((image, ImageSource::MemoryCache));
        }

        match self.disk_cache.get(key).await {
            Ok(image) => {
                self.store_in_memory(key, &image, detached).await;
                return Ok((image, ImageSource::DiskCache));
            }
            Err(CacheError::NotFound(_)) => {}
            Err(e) => warn!(key = %key, error = %e, "Disk cache unusable, fetching from network"),
        }

        let bytes = {
            let _permit = self
                .semaphore
                .acquire()
                .await
                .map_err(|e| CacheError::NetworkError(format!("Download limiter closed: {e}")))?;
            self.network_fetches.fetch_add(1, Ordering::Relaxed);
            self.fetcher.fetch(url).await?
        };

        let image = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
            .await
            .map_err(|e| CacheError::DecodeError(format!("Decode task panicked: {e}")))?
            .map_err(|e| CacheError::DecodeError(format!("Failed to decode image: {e}")))?;
        let image = Arc::new(image);

        if detached.load(Ordering::SeqCst) {
            debug!(key = %key, "Entry invalidated during fetch, not caching");
            return Ok((image, ImageSource::Network));
        }

        match self.disk_cache.put(key, image.clone()).await {
            Ok(_) if detached.load(Ordering::SeqCst) => {
                debug!(key = %key, "Entry invalidated during disk write, removing it");
                self.disk_cache.evict(key).await;
                return Ok((image, ImageSource::Network));
            }
            Ok(_) => {}
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to cache to disk, keeping in memory only");
            }
        }
        self.store_in_memory(key, &image, detached).await;

        Ok((image, ImageSource::Network))
    }

    /// Puts `image` in memory unless the flight is detached.
    ///
    /// `invalidate` and `clear_cache` set the flag before evicting, so either
    /// their eviction runs after this write or the re-check below sees the
    /// flag and undoes it.
    async fn store_in_memory(
        &self,
        key: &CacheKey,
        image: &Arc<image::DynamicImage>,
        detached: &AtomicBool,
    ) {
        if detached.load(Ordering::SeqCst) {
            return;
        }
        self.memory_cache.put(key.clone(), image.clone()).await;
        if detached.load(Ordering::SeqCst) {
            self.memory_cache.evict(key).await;
        }
    }
}

/// Rejects blank and unparseable URLs.
fn validate_url(url: &str) -> CacheResult<()> {
    if url.trim().is_empty() {
        return Err(CacheError::InvalidUrl("blank URL".to_string()));
    }
    reqwest::Url::parse(url)
        .map(|_| ())
        .map_err(|e| CacheError::InvalidUrl(format!("{url}: {e}")))
}
