use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use figcache::infrastructure::{AppConfig, CliArgs, ConfigStore, HttpImageFetcher, ImageCache};
use figcache::presentation::run_command;

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = config.effective_log_path() {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let mut config = match ConfigStore::locate(args.config.as_deref()) {
        Ok(store) => store
            .load_or_create()
            .wrap_err_with(|| format!("Failed to load {}", store.path().display()))?,
        Err(e) => {
            // No subscriber yet.
            eprintln!("figcache: {e}, using default configuration");
            AppConfig::default()
        }
    };
    config.merge_with_args(args);
    Ok(config)
}

async fn create_cache(config: &AppConfig) -> Result<ImageCache> {
    let fetcher = HttpImageFetcher::new(config.network.timeout_secs, &config.network.user_agent)
        .wrap_err("Failed to build HTTP client")?;
    let cache_config = config.image_cache_config();
    let cache = ImageCache::new(&cache_config, Arc::new(fetcher))
        .await
        .wrap_err_with(|| {
            format!(
                "Failed to open cache directory {}",
                cache_config.cache_dir.display()
            )
        })?;
    Ok(cache)
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let config = load_config(&args)?;
    init_logging(&config)?;

    info!(version = figcache::VERSION, command = ?args.command, "Starting {}", figcache::NAME);

    let cache = create_cache(&config).await?;
    let result = run_command(&args.command, &cache, &mut std::io::stdout()).await;
    if let Err(e) = &result {
        warn!(error = %e, "Command failed");
    }
    result
}
