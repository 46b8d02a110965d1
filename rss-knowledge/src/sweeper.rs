use chrono::{Duration, Utc};
use interfaces::{KnowledgeStore, RecordKind};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

pub const DEFAULT_RETENTION_HOURS: i64 = 72;

/// Deletes records older than the retention window, one source at a time.
pub struct ExpirationSweeper {
    store: Arc<dyn KnowledgeStore>,
    retention: Duration,
    include_headlines: bool,
}

impl ExpirationSweeper {
    pub fn new(store: Arc<dyn KnowledgeStore>) -> Self {
        Self {
            store,
            retention: Duration::hours(DEFAULT_RETENTION_HOURS),
            include_headlines: false,
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Headline digests are left alone unless this is set.
    pub fn with_headlines(mut self, include: bool) -> Self {
        self.include_headlines = include;
        self
    }

    /// Returns the total number of records deleted. A failing source is
    /// logged and skipped.
    pub async fn sweep(&self, source_ids: &[Uuid]) -> u64 {
        let cutoff = Utc::now() - self.retention;
        let kind = if self.include_headlines {
            None
        } else {
            Some(RecordKind::Article)
        };

        let mut total = 0;
        for &source_id in source_ids {
            let swept = self.store.delete_records_older_than(source_id, cutoff, kind);
            match swept.await {
                Ok(deleted) => {
                    if deleted > 0 {
                        info!("Deleted {deleted} expired records for source {source_id}");
                    }
                    total += deleted;
                }
                Err(e) => error!("Failed to sweep source {}: {}", source_id, e),
            }
        }
        total
    }
}
