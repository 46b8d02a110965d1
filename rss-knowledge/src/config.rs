use crate::digest::default_topics;
use crate::reconciler::DEFAULT_ITEM_CONCURRENCY;
use crate::sweeper::DEFAULT_RETENTION_HOURS;
use crate::types::{FeedSource, FetchConfig, IngestError, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Tuning shared by every source of a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub retention: chrono::Duration,
    pub sweep_interval: Duration,
    pub item_concurrency: usize,
    pub topics: Vec<String>,
    /// Let the sweeper expire headline digests too.
    pub include_headlines: bool,
    pub fetch: FetchConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retention: chrono::Duration::hours(DEFAULT_RETENTION_HOURS),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            item_concurrency: DEFAULT_ITEM_CONCURRENCY,
            topics: default_topics(),
            include_headlines: false,
            fetch: FetchConfig::default(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FeedsDocument {
    Wrapped { rss_feeds: Vec<FeedSource> },
    Bare(Vec<FeedSource>),
}

/// Accepts either `{ "rss_feeds": [...] }` or a bare array of sources.
pub fn parse_feed_sources(json: &str) -> Result<Vec<FeedSource>> {
    let sources = match serde_json::from_str::<FeedsDocument>(json)? {
        FeedsDocument::Wrapped { rss_feeds } => rss_feeds,
        FeedsDocument::Bare(sources) => sources,
    };
    validate_sources(&sources)?;
    debug!("Loaded {} feed sources", sources.len());
    Ok(sources)
}

pub fn load_feed_sources(path: &Path) -> Result<Vec<FeedSource>> {
    let json = std::fs::read_to_string(path)?;
    parse_feed_sources(&json)
}

pub fn validate_sources(sources: &[FeedSource]) -> Result<()> {
    let mut seen = HashSet::new();
    for source in sources {
        let url = Url::parse(&source.url)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(IngestError::Config(format!(
                "Feed url must be http or https: {}",
                source.url
            )));
        }
        if !seen.insert(source.url.as_str()) {
            return Err(IngestError::Config(format!(
                "Duplicate feed url: {}",
                source.url
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const WRAPPED: &str = r#"{"rss_feeds": [
        {"url": "https://example.com/a", "name": "A", "interval": 60000},
        {"url": "https://example.com/b", "name": "B"}
    ]}"#;

    const DUPLICATES: &str = r#"[
        {"url": "https://example.com/a", "name": "A"},
        {"url": "https://example.com/a", "name": "B"}
    ]"#;

    #[test]
    fn reads_wrapped_document() {
        let sources = parse_feed_sources(WRAPPED).unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].poll_interval_ms, 60_000);
    }

    #[test]
    fn reads_bare_array() {
        let json = r#"[{"url": "http://a.example", "name": "A"}]"#;
        let sources = parse_feed_sources(json).unwrap();
        assert_eq!(sources[0].name, "A");
        assert!(parse_feed_sources("[]").unwrap().is_empty());
    }

    #[test]
    fn rejects_bad_urls() {
        let json = r#"[{"url": "not a url", "name": "A"}]"#;
        let err = parse_feed_sources(json).unwrap_err();
        assert!(matches!(err, IngestError::InvalidUrl(_)));

        let json = r#"[{"url": "ftp://a.example", "name": "A"}]"#;
        let err = parse_feed_sources(json).unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
    }

    #[test]
    fn rejects_duplicate_urls() {
        let err = parse_feed_sources(DUPLICATES).unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
    }

    #[test]
    fn loads_from_file() {
        let name = format!("feeds-{}.json", uuid::Uuid::new_v4());
        let path = std::env::temp_dir().join(name);
        std::fs::write(&path, WRAPPED).unwrap();
        let sources = load_feed_sources(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(sources.len(), 2);

        let missing = Path::new("/nonexistent/feeds.json");
        let err = load_feed_sources(missing).unwrap_err();
        assert!(matches!(err, IngestError::Io(_)));
    }
}
