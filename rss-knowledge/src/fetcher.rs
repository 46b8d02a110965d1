use crate::types::{FetchConfig, FetchResult, Result};
use chrono::Utc;
use reqwest::Client;
use std::time::Instant;
use tracing::{debug, info, warn};

pub struct Fetcher {
    client: Client,
    config: FetchConfig,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()?;

        Ok(Self { client, config })
    }

    /// One GET of the feed document.
    ///
    /// Transport failures come back as `IngestError::Http`. Any response that
    /// arrived but cannot be used (non-2xx, oversized) is an unsuccessful
    /// `FetchResult` instead.
    pub async fn fetch_feed(&self, url: &str) -> Result<FetchResult> {
        let start_time = Instant::now();
        let fetch_time = Utc::now();

        debug!("Fetching feed: {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();

        let failed = |error: String| FetchResult {
            success: false,
            http_status: Some(status.as_u16()),
            error: Some(error),
            content: None,
            fetch_time,
            response_time_ms: start_time.elapsed().as_millis() as u64,
        };

        if !status.is_success() {
            warn!("Feed {} answered HTTP {}", url, status);
            return Ok(failed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let max_bytes = self.config.max_feed_size_mb * 1024 * 1024;
        if let Some(content_length) = response.content_length() {
            if content_length as usize > max_bytes {
                return Ok(failed(format!("Feed too large: {} bytes", content_length)));
            }
        }

        let body = response.bytes().await?;
        if body.len() > max_bytes {
            return Ok(failed(format!("Feed too large: {} bytes", body.len())));
        }

        let content = String::from_utf8_lossy(&body).into_owned();
        info!("Fetched feed: {} ({} bytes)", url, content.len());

        Ok(FetchResult {
            success: true,
            http_status: Some(status.as_u16()),
            error: None,
            content: Some(content),
            fetch_time,
            response_time_ms: start_time.elapsed().as_millis() as u64,
        })
    }
}
