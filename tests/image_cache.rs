//! End-to-end behaviour of the two-tier cache through the public API.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tempfile::TempDir;

use figcache::domain::{CacheError, CacheResult, ImageCachePort, ImageFetcherPort};
use figcache::{CacheKey, ImageCache, ImageCacheConfig, ImageLoader, ImageSource};

const FIGURE_URL: &str = "https://img.example.com/figures/optimus-prime.jpg?size=large";
const OTHER_URL: &str = "https://img.example.com/figures/megatron.png";

/// Serves one PNG for every URL except `missing`, after a short delay.
struct SlowFetcher {
    calls: AtomicUsize,
    delay: Duration,
}

impl SlowFetcher {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ImageFetcherPort for SlowFetcher {
    async fn fetch(&self, url: &str) -> CacheResult<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if url.contains("missing") {
            return Err(CacheError::NetworkError(format!("HTTP 404 for {url}")));
        }
        let mut buf = Cursor::new(Vec::new());
        image::DynamicImage::new_rgb8(32, 24)
            .write_to(&mut buf, image::ImageFormat::Png)
            .unwrap();
        Ok(Bytes::from(buf.into_inner()))
    }
}

async fn open_cache(dir: &TempDir, fetcher: Arc<SlowFetcher>) -> ImageCache {
    let config = ImageCacheConfig {
        cache_dir: dir.path().join("images"),
        ..ImageCacheConfig::default()
    };
    ImageCache::new(&config, fetcher).await.unwrap()
}

#[tokio::test]
async fn fetch_invalidate_and_refetch() {
    let dir = TempDir::new().unwrap();
    let fetcher = SlowFetcher::new(Duration::from_millis(5));
    let cache = open_cache(&dir, fetcher.clone()).await;

    let image = cache.get_image(FIGURE_URL).await.unwrap();
    assert_eq!((image.width(), image.height()), (32, 24));
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(cache.memory().len(), 1);
    assert_eq!(cache.disk().len().await, 1);
    assert!(cache.cache_size_bytes().await > 0);

    let key = CacheKey::from_url(FIGURE_URL);
    assert!(key.as_str().ends_with("_optimus-prime.jpg"));
    assert!(cache.disk().entry_path(&key).exists());

    cache.invalidate(FIGURE_URL).await;
    assert_eq!(cache.memory().len(), 0);
    assert_eq!(cache.disk().len().await, 0);

    assert!(cache.get_image(FIGURE_URL).await.is_some());
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn disk_tier_survives_restart() {
    let dir = TempDir::new().unwrap();
    let fetcher = SlowFetcher::new(Duration::ZERO);

    let first = open_cache(&dir, fetcher.clone()).await;
    first.get_image(FIGURE_URL).await.unwrap();
    drop(first);

    let second = open_cache(&dir, fetcher.clone()).await;
    let loaded = second.load(FIGURE_URL).await.unwrap();
    assert_eq!(loaded.source, ImageSource::DiskCache);
    assert_eq!(fetcher.calls(), 1);

    let again = second.load(FIGURE_URL).await.unwrap();
    assert_eq!(again.source, ImageSource::MemoryCache);
}

#[tokio::test]
async fn concurrent_requests_share_one_fetch() {
    let dir = TempDir::new().unwrap();
    let fetcher = SlowFetcher::new(Duration::from_millis(50));
    let cache = open_cache(&dir, fetcher.clone()).await;

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_image(FIGURE_URL).await })
        })
        .collect();

    let mut images = Vec::new();
    for task in tasks {
        images.push(task.await.unwrap().unwrap());
    }

    assert_eq!(fetcher.calls(), 1);
    assert_eq!(cache.network_fetch_count(), 1);
    assert!(images.iter().all(|image| Arc::ptr_eq(image, &images[0])));
    assert_eq!(cache.pending_count(), 0);
}

#[tokio::test]
async fn failures_are_absent_and_not_cached() {
    let dir = TempDir::new().unwrap();
    let fetcher = SlowFetcher::new(Duration::ZERO);
    let cache = open_cache(&dir, fetcher.clone()).await;
    let missing = "https://img.example.com/figures/missing.jpg";

    assert!(cache.get_image(missing).await.is_none());
    assert!(cache.get_image(missing).await.is_none());
    assert_eq!(fetcher.calls(), 2);
    assert_eq!(cache.disk().len().await, 0);

    assert!(cache.get_image("").await.is_none());
    assert!(cache.get_image("not a url").await.is_none());
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn clear_cache_empties_both_tiers() {
    let dir = TempDir::new().unwrap();
    let fetcher = SlowFetcher::new(Duration::ZERO);
    let cache = open_cache(&dir, fetcher.clone()).await;

    cache.get_image(FIGURE_URL).await.unwrap();
    cache.get_image(OTHER_URL).await.unwrap();
    assert_eq!(cache.disk().len().await, 2);

    cache.clear_cache().await;
    assert_eq!(cache.memory().len(), 0);
    assert_eq!(cache.cache_size_bytes().await, 0);

    cache.get_image(OTHER_URL).await.unwrap();
    assert_eq!(fetcher.calls(), 3);
}

#[tokio::test]
async fn dropped_loader_does_not_cancel_shared_fetch() {
    let dir = TempDir::new().unwrap();
    let fetcher = SlowFetcher::new(Duration::from_millis(40));
    let cache = open_cache(&dir, fetcher.clone()).await;

    let impatient = Arc::new(ImageLoader::new(cache.clone()));
    let waiting = {
        let impatient = impatient.clone();
        tokio::spawn(async move { impatient.load(FIGURE_URL, false).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    impatient.reset();
    waiting.await.unwrap();
    assert!(impatient.state().is_idle());

    let patient = ImageLoader::new(cache.clone());
    patient.load(FIGURE_URL, false).await;
    assert!(patient.state().is_loaded_for(FIGURE_URL));
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn loader_force_refresh_fetches_again() {
    let dir = TempDir::new().unwrap();
    let fetcher = SlowFetcher::new(Duration::ZERO);
    let cache = open_cache(&dir, fetcher.clone()).await;
    let loader = ImageLoader::new(cache);

    loader.load(OTHER_URL, false).await;
    loader.load(OTHER_URL, false).await;
    assert_eq!(fetcher.calls(), 1);

    loader.load(OTHER_URL, true).await;
    assert!(loader.state().is_loaded_for(OTHER_URL));
    assert_eq!(fetcher.calls(), 2);
}
