//! Presentation layer: per-slot image state and command-line front end.

/// Command-line operations.
pub mod commands;
/// Reusable widgets.
pub mod widgets;

pub use commands::run_command;
pub use widgets::ImageLoader;
