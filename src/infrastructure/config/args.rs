use super::app_config::LogLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments; every option overrides the config file.
#[derive(Debug, Parser)]
#[command(
    name = "figcache",
    version,
    about = "Two-tier image cache for a figure collection tracker",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH")]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Disk cache directory.
    #[arg(long, value_name = "DIR", env = "FIGCACHE_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Maximum decoded images kept in memory.
    #[arg(long)]
    pub memory_capacity: Option<usize>,

    /// JPEG quality of disk entries (1-100).
    #[arg(long)]
    pub jpeg_quality: Option<u8>,

    /// Request timeout in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Maximum simultaneous downloads.
    #[arg(long)]
    pub max_concurrent_downloads: Option<usize>,

    /// Operation to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Cache operations exposed on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Fetch images through the cache and report where they came from.
    Get {
        /// Image URLs.
        #[arg(required = true)]
        urls: Vec<String>,

        /// Invalidate each entry before fetching.
        #[arg(long)]
        refresh: bool,

        /// Save the (single) fetched image to this path.
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Warm the cache from a file with one URL per line.
    Prefetch {
        /// File of URLs; blank lines and `#` comments are skipped.
        file: PathBuf,
    },
    /// Remove one URL from both tiers.
    Invalidate {
        /// Image URL.
        url: String,
    },
    /// Empty both tiers.
    Clear,
    /// Print the disk tier size.
    Size,
    /// Print the cache key and entry path for a URL.
    Key {
        /// Image URL.
        url: String,
    },
}
