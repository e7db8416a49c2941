//! figcache - two-tier image cache for a figure collection tracker.
//!
//! This crate provides the image caching and retrieval layer that sits between
//! a collection UI and the network: a bounded memory tier, a persistent disk
//! tier, de-duplicated downloads, and a per-slot loader state machine.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing adapters for external services.
pub mod infrastructure;
/// Presentation layer containing UI-facing state and the CLI front end.
pub mod presentation;

pub use domain::{CacheError, CacheKey, CacheResult, ImageSource, LoadedImage, LoaderState};
pub use infrastructure::{ImageCache, ImageCacheConfig};
pub use presentation::ImageLoader;

/// Current version of the application.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const NAME: &str = "figcache";
