//! Command-line operations over the shared image cache.

use std::io::Write;
use std::path::Path;

use color_eyre::eyre::{Result, WrapErr, bail};
use tracing::info;

use crate::domain::entities::CacheKey;
use crate::infrastructure::config::Command;
use crate::infrastructure::image::ImageCache;

/// Runs one command, writing a human-readable report to `out`.
///
/// # Errors
/// Returns an error if output cannot be written, a requested file cannot be
/// read or written, or any requested image is unavailable.
pub async fn run_command<W: Write>(
    command: &Command,
    cache: &ImageCache,
    out: &mut W,
) -> Result<()> {
    match command {
        Command::Get {
            urls,
            refresh,
            output,
        } => get(cache, urls, *refresh, output.as_deref(), out).await,
        Command::Prefetch { file } => prefetch(cache, file, out).await,
        Command::Invalidate { url } => {
            cache.invalidate(url).await;
            writeln!(out, "invalidated {}", CacheKey::from_url(url))?;
            Ok(())
        }
        Command::Clear => {
            cache.clear_cache().await;
            writeln!(out, "cache cleared")?;
            Ok(())
        }
        Command::Size => {
            let bytes = cache.cache_size_bytes().await;
            let entries = cache.disk().len().await;
            writeln!(out, "{bytes} bytes in {entries} entries")?;
            Ok(())
        }
        Command::Key { url } => {
            let key = CacheKey::from_url(url);
            writeln!(out, "{key}\t{}", cache.disk().entry_path(&key).display())?;
            Ok(())
        }
    }
}

async fn get<W: Write>(
    cache: &ImageCache,
    urls: &[String],
    refresh: bool,
    output: Option<&Path>,
    out: &mut W,
) -> Result<()> {
    if output.is_some() && urls.len() != 1 {
        bail!("--output needs exactly one URL, got {}", urls.len());
    }

    let mut failed = 0usize;
    for url in urls {
        if refresh {
            cache.invalidate(url).await;
        }
        match cache.load(url).await {
            Ok(loaded) => {
                writeln!(
                    out,
                    "{url}\t{}x{}\t{}\t{}",
                    loaded.image.width(),
                    loaded.image.height(),
                    loaded.source,
                    loaded.key
                )?;
                if let Some(path) = output {
                    let path = path.to_path_buf();
                    let image = loaded.image.clone();
                    tokio::task::spawn_blocking(move || image.save(&path))
                        .await
                        .wrap_err("Save task failed")?
                        .wrap_err("Failed to save image")?;
                }
            }
            Err(e) => {
                failed += 1;
                writeln!(out, "{url}\tunavailable\t{e}")?;
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} images unavailable", urls.len());
    }
    Ok(())
}

async fn prefetch<W: Write>(cache: &ImageCache, file: &Path, out: &mut W) -> Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .wrap_err_with(|| format!("Failed to read {}", file.display()))?;
    let urls = parse_url_list(&content);
    let total = urls.len();

    let loaded = cache
        .prefetch(urls)
        .await
        .wrap_err("Prefetch task failed")?;

    info!(total, loaded, "Prefetch finished");
    writeln!(out, "prefetched {loaded}/{total}")?;
    Ok(())
}

/// One URL per line; blank lines and `#` comments are skipped.
fn parse_url_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::domain::ports::mocks::MockImageFetcher;
    use crate::infrastructure::image::ImageCacheConfig;

    const URL_A: &str = "https://example.com/a.jpg";

    async fn create_cache(
        fetcher: MockImageFetcher,
    ) -> (ImageCache, Arc<MockImageFetcher>, TempDir) {
        let temp = TempDir::new().unwrap();
        let fetcher = Arc::new(fetcher);
        let config = ImageCacheConfig {
            cache_dir: temp.path().join("images"),
            ..ImageCacheConfig::default()
        };
        let cache = ImageCache::new(&config, fetcher.clone()).await.unwrap();
        (cache, fetcher, temp)
    }

    async fn run(command: Command, cache: &ImageCache) -> (Result<()>, String) {
        let mut out = Vec::new();
        let result = run_command(&command, cache, &mut out).await;
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_parse_url_list() {
        let urls = parse_url_list("# figures\nhttps://a.test/1.jpg\n\n  https://a.test/2.jpg  \n");
        assert_eq!(urls, vec!["https://a.test/1.jpg", "https://a.test/2.jpg"]);
    }

    #[tokio::test]
    async fn test_get_reports_source() {
        let (cache, _fetcher, _temp) =
            create_cache(MockImageFetcher::new().with_image(URL_A, 10, 5)).await;

        let command = Command::Get {
            urls: vec![URL_A.to_string()],
            refresh: false,
            output: None,
        };
        let (result, first) = run(command.clone(), &cache).await;
        result.unwrap();
        assert!(first.contains("10x5\tnetwork"));

        let (result, second) = run(command, &cache).await;
        result.unwrap();
        assert!(second.contains("\tmemory\t"));
    }

    #[tokio::test]
    async fn test_get_unavailable_fails() {
        let (cache, _fetcher, _temp) = create_cache(MockImageFetcher::new()).await;

        let (result, out) = run(
            Command::Get {
                urls: vec![URL_A.to_string()],
                refresh: false,
                output: None,
            },
            &cache,
        )
        .await;
        assert!(result.is_err());
        assert!(out.contains("unavailable"));
    }

    #[tokio::test]
    async fn test_get_saves_output() {
        let (cache, _fetcher, temp) =
            create_cache(MockImageFetcher::new().with_image(URL_A, 10, 5)).await;
        let path = temp.path().join("saved.png");

        let (result, _) = run(
            Command::Get {
                urls: vec![URL_A.to_string()],
                refresh: false,
                output: Some(path.clone()),
            },
            &cache,
        )
        .await;
        result.unwrap();
        assert_eq!(image::open(&path).unwrap().width(), 10);
    }

    #[tokio::test]
    async fn test_refresh_refetches() {
        let (cache, fetcher, _temp) =
            create_cache(MockImageFetcher::new().with_image(URL_A, 2, 2)).await;
        let command = Command::Get {
            urls: vec![URL_A.to_string()],
            refresh: true,
            output: None,
        };

        run(command.clone(), &cache).await.0.unwrap();
        run(command, &cache).await.0.unwrap();
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_prefetch_size_and_clear() {
        let (cache, _fetcher, temp) =
            create_cache(MockImageFetcher::new().with_image(URL_A, 8, 8)).await;
        let list = temp.path().join("urls.txt");
        std::fs::write(&list, format!("{URL_A}\nhttps://example.com/missing.jpg\n")).unwrap();

        let (result, out) = run(Command::Prefetch { file: list }, &cache).await;
        result.unwrap();
        assert_eq!(out.trim(), "prefetched 1/2");

        let (_, out) = run(Command::Size, &cache).await;
        assert!(out.trim().ends_with("in 1 entries"));

        let (result, out) = run(Command::Clear, &cache).await;
        result.unwrap();
        assert_eq!(out.trim(), "cache cleared");

        let (_, out) = run(Command::Size, &cache).await;
        assert_eq!(out.trim(), "0 bytes in 0 entries");
    }

    #[tokio::test]
    async fn test_key_prints_entry_path() {
        let (cache, _fetcher, _temp) = create_cache(MockImageFetcher::new()).await;

        let (result, out) = run(
            Command::Key {
                url: URL_A.to_string(),
            },
            &cache,
        )
        .await;
        result.unwrap();
        let key = CacheKey::from_url(URL_A);
        assert!(out.starts_with(key.as_str()));
        assert!(out.trim().ends_with(&format!("{key}.jpg")));
    }
}
