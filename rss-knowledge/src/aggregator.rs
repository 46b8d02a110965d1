use crate::config::PipelineConfig;
use crate::digest::HeadlineAggregator;
use crate::fetcher::Fetcher;
use crate::parser::parse_feed;
use crate::reconciler::Reconciler;
use crate::types::{CycleReport, FeedSource, Result};
use interfaces::KnowledgeStore;
use std::sync::Arc;
use tracing::{info, warn};

/// Runs one ingestion cycle for a source: fetch, parse, reconcile, and
/// refresh the headline digest when something new arrived.
pub struct FeedIngestor {
    fetcher: Fetcher,
    reconciler: Reconciler,
    headlines: HeadlineAggregator,
}

impl FeedIngestor {
    pub fn new(store: Arc<dyn KnowledgeStore>, config: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            fetcher: Fetcher::new(config.fetch.clone())?,
            reconciler: Reconciler::new(store.clone())
                .with_concurrency(config.item_concurrency),
            headlines: HeadlineAggregator::new(store)
                .with_topics(config.topics.clone()),
        })
    }

    pub async fn run_cycle(&self, source: &FeedSource) -> Result<CycleReport> {
        let mut report = CycleReport {
            source_id: source.id(),
            ..Default::default()
        };

        let fetch_result = self.fetcher.fetch_feed(&source.url).await?;
        let content = match fetch_result.content {
            Some(content) if fetch_result.success => content,
            _ => {
                warn!(
                    "Failed to fetch RSS feed {}: {}",
                    source.name,
                    fetch_result.error.as_deref().unwrap_or("no content")
                );
                return Ok(report);
            }
        };
        report.fetched = true;

        let feed = parse_feed(&content)?;
        report.items_found = feed.items.len();

        report.added = self.reconciler.reconcile(source, &feed.items).await;
        info!("Added {} records from RSS feed {}", report.added, source.name);

        if report.added > 0 {
            self.headlines.replace(source, &feed).await?;
            report.headline_updated = true;
        }

        Ok(report)
    }
}
