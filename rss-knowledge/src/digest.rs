use crate::markdown::html_to_text;
use crate::types::{FeedSource, ParsedFeed, RawItem};
use chrono::Utc;
use interfaces::{KnowledgeRecord, KnowledgeStore, RecordKind, StoreResult};
use std::sync::Arc;
use tracing::info;

pub const DEFAULT_TOPICS: &[&str] = &[
    "The latest headlines.",
    "What is the latest news?",
    "What's happening in the crypto space?",
    "Is there any news that you should be aware of?",
    "What's going on?",
];

pub fn default_topics() -> Vec<String> {
    DEFAULT_TOPICS.iter().map(|t| t.to_string()).collect()
}

/// Maintains the single "latest headlines" record of each source. The digest
/// is rebuilt from the whole current feed and replaces the previous one.
pub struct HeadlineAggregator {
    store: Arc<dyn KnowledgeStore>,
    topics: Vec<String>,
}

impl HeadlineAggregator {
    pub fn new(store: Arc<dyn KnowledgeStore>) -> Self {
        Self {
            store,
            topics: default_topics(),
        }
    }

    pub fn with_topics(mut self, topics: Vec<String>) -> Self {
        self.topics = topics;
        self
    }

    pub fn build(&self, source: &FeedSource, feed: &ParsedFeed) -> KnowledgeRecord {
        let id = source.id();
        let title = format!("Latest News from {}", source.name);

        let mut lines = vec![title.clone()];
        for item in &feed.items {
            lines.push(format!("    - {}", headline_line(item)));
        }
        lines.push(String::new());

        let fragment = std::iter::once(&title)
            .chain(self.topics.iter())
            .map(|text| self.store.preprocess(text))
            .collect::<Vec<_>>()
            .join(" ");

        KnowledgeRecord {
            id,
            owner_id: id,
            kind: RecordKind::Headline,
            text: lines.join("\n"),
            url: None,
            source_url: source.url.clone(),
            created_at: feed.build_date.unwrap_or_else(Utc::now),
            fragments: vec![fragment],
        }
    }

    /// Deletes the previous digest and its fragments, then writes the new one.
    pub async fn replace(&self, source: &FeedSource, feed: &ParsedFeed) -> StoreResult<()> {
        let record = self.build(source, feed);
        let id = record.id;

        self.store.delete_record(id).await?;
        self.store.delete_fragments_by_source(id).await?;
        self.store.create_record(record).await?;

        info!("Updated headlines from RSS feed {}", source.name);
        Ok(())
    }
}

fn headline_line(item: &RawItem) -> String {
    let summary = item
        .summary
        .as_deref()
        .or(item.description.as_deref())
        .map(html_to_text)
        .unwrap_or_default();
    let first_line = summary
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default();

    format!("**{}**: {}", item.title.trim(), first_line)
}
