use chrono::{DateTime, Utc};
use interfaces::StoreError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 15 * 60 * 1000;

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

/// One configured feed. The url is the unique key; everything derived from a
/// source (account, digest, article ownership) hangs off `id()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSource {
    pub url: String,
    pub name: String,
    #[serde(default = "default_poll_interval_ms", alias = "interval")]
    pub poll_interval_ms: u64,
    #[serde(default, alias = "exclude")]
    pub exclude_title_substrings: Vec<String>,
    #[serde(default, alias = "useCategories")]
    pub use_category_tags: bool,
}

impl FeedSource {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            exclude_title_substrings: Vec::new(),
            use_category_tags: false,
        }
    }

    pub fn with_exclusions<I, S>(mut self, substrings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_title_substrings = substrings.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_category_tags(mut self, enabled: bool) -> Self {
        self.use_category_tags = enabled;
        self
    }

    pub fn with_poll_interval_ms(mut self, interval_ms: u64) -> Self {
        self.poll_interval_ms = interval_ms;
        self
    }

    pub fn id(&self) -> Uuid {
        crate::identity::source_id(&self.url)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Case-insensitive match of the title against the exclusion list.
    pub fn is_excluded(&self, title: &str) -> bool {
        let title = title.to_lowercase();
        self.exclude_title_substrings
            .iter()
            .any(|text| title.contains(&text.to_lowercase()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCategory {
    /// RSS `domain` attribute or Atom `scheme`.
    pub domain: Option<String>,
    pub label: String,
}

/// A feed entry as it came out of the parser, before any conversion. Each
/// body encoding the document may carry gets its own field.
#[derive(Debug, Clone, Default)]
pub struct RawItem {
    pub title: String,
    pub link: String,
    pub guid: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub content_encoded: Option<String>,
    pub content: Option<String>,
    pub content_snippet_encoded: Option<String>,
    pub content_snippet: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub categories: Vec<RawCategory>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub build_date: Option<DateTime<Utc>>,
    pub items: Vec<RawItem>,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub max_feed_size_mb: usize,
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "RSS-Knowledge/1.0".to_string(),
            max_feed_size_mb: 10,
            max_redirects: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub success: bool,
    pub http_status: Option<u16>,
    pub error: Option<String>,
    pub content: Option<String>,
    pub fetch_time: DateTime<Utc>,
    pub response_time_ms: u64,
}

/// Outcome of one ingestion cycle for one source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub source_id: Uuid,
    pub fetched: bool,
    pub items_found: usize,
    pub added: usize,
    pub headline_updated: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parse error: {0}")]
    Parse(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IngestError {
    /// Transport failures are expected now and then; the next poll retries.
    pub fn is_transport(&self) -> bool {
        matches!(self, IngestError::Http(_))
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
