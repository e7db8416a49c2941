//! Domain types for image caching.

use std::sync::Arc;

/// Length of the hash prefix of a [`CacheKey`], in hex characters.
const KEY_HASH_HEX_LEN: usize = 16;

/// Maximum length of the readable suffix of a [`CacheKey`].
const KEY_SUFFIX_MAX_LEN: usize = 40;

/// Identifier of a cached image, derived from its source URL.
///
/// The key is a 64-bit SHA-256 prefix in hex followed by a sanitized copy of
/// the last URL path segment, so it is safe to use as a file name and still
/// tells a human which image it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for a URL.
    #[must_use]
    pub fn from_url(url: &str) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        let digest = hasher.finalize();
        let hash = hex::encode(&digest[..KEY_HASH_HEX_LEN / 2]);

        match readable_suffix(url) {
            Some(suffix) => Self(format!("{hash}_{suffix}")),
            None => Self(hash),
        }
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Last non-empty path segment of `url`, with query and fragment removed and
/// every character outside `[A-Za-z0-9._-]` replaced by `_`.
fn readable_suffix(url: &str) -> Option<String> {
    let without_fragment = url.split('#').next().unwrap_or_default();
    let path = without_fragment.split('?').next().unwrap_or_default();
    let path = path
        .split_once("://")
        .map_or(path, |(_, rest)| rest.split_once('/').map_or("", |(_, p)| p));

    let segment = path.rsplit('/').find(|s| !s.is_empty())?;

    let sanitized: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(KEY_SUFFIX_MAX_LEN)
        .collect();

    let trimmed = sanitized.trim_start_matches('.');
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '_') {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Where an image was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Loaded from the in-memory LRU tier.
    MemoryCache,
    /// Loaded from the disk tier.
    DiskCache,
    /// Downloaded from the network.
    Network,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory"),
            Self::DiskCache => write!(f, "disk"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// A decoded image together with its provenance.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Cache key of the image.
    pub key: CacheKey,
    /// Decoded, display-ready image.
    pub image: Arc<image::DynamicImage>,
    /// Tier the image was served from.
    pub source: ImageSource,
}

/// Display state of one image slot.
#[derive(Debug, Clone, Default)]
pub enum LoaderState {
    /// Nothing requested.
    #[default]
    Idle,
    /// A request for the URL is outstanding.
    Loading(String),
    /// The URL resolved to an image.
    Loaded(String, Arc<image::DynamicImage>),
    /// The URL could not be resolved.
    Failed(String, String),
}

impl LoaderState {
    /// URL this state refers to, if any.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Idle => None,
            Self::Loading(url) | Self::Loaded(url, _) | Self::Failed(url, _) => Some(url),
        }
    }

    /// Image to display, if loaded.
    #[must_use]
    pub fn image(&self) -> Option<&Arc<image::DynamicImage>> {
        match self {
            Self::Loaded(_, image) => Some(image),
            _ => None,
        }
    }

    /// Returns true if nothing has been requested.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true while a request is outstanding.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading(_))
    }

    /// Returns true if an image is ready for display.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(..))
    }

    /// Returns true if loading failed.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(..))
    }

    /// Returns true if this is a loaded image for exactly `url`.
    #[must_use]
    pub fn is_loaded_for(&self, url: &str) -> bool {
        matches!(self, Self::Loaded(loaded, _) if loaded == url)
    }
}
