//! Network adapter for the image fetcher port.

use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::domain::ports::{CacheError, CacheResult, ImageFetcherPort};

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default User-Agent; some figure sites reject requests without a browser UA.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Downloads image bytes over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    /// Creates a fetcher with the given timeout and User-Agent.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(timeout_secs: u64, user_agent: &str) -> CacheResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(user_agent)
            .build()
            .map_err(|e| CacheError::NetworkError(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl ImageFetcherPort for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> CacheResult<Bytes> {
        debug!(url = %url, "Downloading image from network");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CacheError::NetworkError(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CacheError::NetworkError(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CacheError::NetworkError(format!("Failed to read body: {e}")))?;

        trace!(url = %url, size = bytes.len(), content_type = ?content_type, "Downloaded image");
        Ok(bytes)
    }
}
