//! Per-slot image loader bound to the shared cache.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::{AbortHandle, Abortable};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::domain::entities::LoaderState;
use crate::infrastructure::image::ImageCache;

/// Tracks the display state of one image slot.
///
/// Each slot owns its own loader; two slots showing the same URL share the
/// cached image but never share state. Dropping the loader or calling
/// [`ImageLoader::reset`] cancels only this slot's wait; the cache keeps
/// fetching for anyone else interested in the key.
pub struct ImageLoader {
    cache: ImageCache,
    state: watch::Sender<LoaderState>,
    pending: Mutex<Option<PendingLoad>>,
    next_generation: AtomicU64,
}

struct PendingLoad {
    generation: u64,
    abort: AbortHandle,
}

impl ImageLoader {
    /// Creates an idle loader.
    #[must_use]
    pub fn new(cache: ImageCache) -> Self {
        let (state, _) = watch::channel(LoaderState::Idle);
        Self {
            cache,
            state,
            pending: Mutex::new(None),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> LoaderState {
        self.state.borrow().clone()
    }

    /// Image to display, if loaded.
    #[must_use]
    pub fn image(&self) -> Option<Arc<image::DynamicImage>> {
        self.state.borrow().image().cloned()
    }

    /// URL currently tracked, if any.
    #[must_use]
    pub fn url(&self) -> Option<String> {
        self.state.borrow().url().map(String::from)
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LoaderState> {
        self.state.subscribe()
    }

    /// Loads `url` into this slot.
    ///
    /// Does nothing if the slot already shows `url` and `force_refresh` is
    /// false. With `force_refresh` the cache entry is invalidated first so the
    /// image is fetched again. A newer call on the same loader supersedes this
    /// one, which then returns without touching the state.
    pub async fn load(&self, url: &str, force_refresh: bool) {
        if !force_refresh && self.state.borrow().is_loaded_for(url) {
            trace!(url = %url, "Already loaded");
            return;
        }

        if self.state.borrow().url().is_some_and(|tracked| tracked != url) {
            self.reset();
        }

        if force_refresh {
            self.cache.invalidate(url).await;
        }

        let (abort, registration) = AbortHandle::new_pair();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        {
            let mut pending = self.pending.lock();
            if let Some(previous) = pending.replace(PendingLoad { generation, abort }) {
                previous.abort.abort();
            }
            self.state.send_replace(LoaderState::Loading(url.to_string()));
        }

        let Ok(result) = Abortable::new(self.cache.load(url), registration).await else {
            trace!(url = %url, "Load superseded");
            return;
        };

        let mut pending = self.pending.lock();
        if !pending
            .as_ref()
            .is_some_and(|current| current.generation == generation)
        {
            trace!(url = %url, "Load finished after being superseded");
            return;
        }
        *pending = None;

        let next = match result {
            Ok(loaded) => {
                debug!(url = %url, source = %loaded.source, "Slot loaded");
                LoaderState::Loaded(url.to_string(), loaded.image)
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Slot failed");
                LoaderState::Failed(url.to_string(), e.to_string())
            }
        };
        self.state.send_replace(next);
    }

    /// Returns to idle, forgetting the tracked URL and cancelling any wait.
    pub fn reset(&self) {
        if let Some(previous) = self.pending.lock().take() {
            previous.abort.abort();
        }
        self.state.send_replace(LoaderState::Idle);
    }

    /// Returns true while a load is outstanding.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading()
    }
}

impl Drop for ImageLoader {
    fn drop(&mut self) {
        if let Some(previous) = self.pending.get_mut().take() {
            previous.abort.abort();
        }
    }
}

impl std::fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("ImageLoader")
            .field("url", &state.url())
            .field("loaded", &state.is_loaded())
            .field("loading", &state.is_loading())
            .field("failed", &state.is_failed())
            .finish_non_exhaustive()
    }
}
