use crate::identity::{
    article_id, body_fragments, category_fragments, display_text, resolve_body,
};
use crate::markdown::html_to_text;
use crate::types::{FeedSource, RawItem};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use interfaces::{KnowledgeRecord, KnowledgeStore, RecordKind, StoreError, StoreResult};
use std::sync::Arc;
use tracing::{debug, error};

pub const DEFAULT_ITEM_CONCURRENCY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    Added,
    Excluded,
    AlreadyPresent,
}

/// Turns parsed items into article records, skipping anything the store
/// already holds.
pub struct Reconciler {
    store: Arc<dyn KnowledgeStore>,
    concurrency: usize,
}

impl Reconciler {
    pub fn new(store: Arc<dyn KnowledgeStore>) -> Self {
        Self {
            store,
            concurrency: DEFAULT_ITEM_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Returns the number of records added. Per-item store failures are
    /// logged and do not stop the remaining items.
    pub async fn reconcile(&self, source: &FeedSource, items: &[RawItem]) -> usize {
        let pending: Vec<BoxFuture<'_, usize>> = items
            .iter()
            .map(|item| self.count_item(source, item).boxed())
            .collect();

        stream::iter(pending)
            .buffer_unordered(self.concurrency)
            .fold(0, |added, n| async move { added + n })
            .await
    }

    async fn count_item(&self, source: &FeedSource, item: &RawItem) -> usize {
        match self.ingest_item(source, item).await {
            Ok(ItemOutcome::Added) => 1,
            Ok(_) => 0,
            Err(e) => {
                error!(
                    "Failed to ingest item '{}' from {}: {}",
                    item.title, source.url, e
                );
                0
            }
        }
    }

    pub async fn ingest_item(
        &self,
        source: &FeedSource,
        item: &RawItem,
    ) -> StoreResult<ItemOutcome> {
        if source.is_excluded(&item.title) {
            debug!("Excluded item '{}'", item.title);
            return Ok(ItemOutcome::Excluded);
        }

        let id = article_id(item);
        if self.store.record_exists(id).await? {
            return Ok(ItemOutcome::AlreadyPresent);
        }

        let converted = resolve_body(item).map(html_to_text).unwrap_or_default();

        let mut fragments = body_fragments(&item.title, &converted);
        if source.use_category_tags {
            fragments.extend(category_fragments(item));
        }
        let fragments = fragments
            .iter()
            .map(|fragment| self.store.preprocess(fragment))
            .filter(|fragment| !fragment.is_empty())
            .collect();

        let record = KnowledgeRecord {
            id,
            owner_id: source.id(),
            kind: RecordKind::Article,
            text: display_text(&item.title, &converted),
            url: Some(item.link.clone()).filter(|link| !link.is_empty()),
            source_url: source.url.clone(),
            created_at: item.published_at.unwrap_or_else(Utc::now),
            fragments,
        };

        match self.store.create_record(record).await {
            Ok(()) => {
                debug!("Added article {} '{}'", id, item.title);
                Ok(ItemOutcome::Added)
            }
            // another cycle won the race
            Err(StoreError::Duplicate { .. }) => Ok(ItemOutcome::AlreadyPresent),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration};
    use interfaces::MemoryKnowledgeStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn source() -> FeedSource {
        FeedSource::new("https://example.com/feed", "Example")
    }

    fn item(title: &str, guid: &str, body: &str) -> RawItem {
        RawItem {
            title: title.to_string(),
            link: format!("https://example.com/{guid}"),
            guid: Some(guid.to_string()),
            content_encoded: Some(body.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn adds_each_item_once() {
        let store = MemoryKnowledgeStore::new();
        let reconciler = Reconciler::new(Arc::new(store.clone()));
        let items = vec![
            item("One", "1", "<p>Para one.</p><p>Para two.</p>"),
            item("Two", "2", "<p>Body</p>"),
        ];

        assert_eq!(reconciler.reconcile(&source(), &items).await, 2);
        assert_eq!(reconciler.reconcile(&source(), &items).await, 0);
        assert_eq!(store.record_count().await, 2);

        let record = store.get_record(article_id(&items[0])).await.unwrap();
        assert_eq!(record.kind, RecordKind::Article);
        assert_eq!(record.owner_id, source().id());
        assert_eq!(record.text, "**One**: Para one. Para two.");
        assert_eq!(record.fragments, vec!["one para one.", "one para two."]);
    }

    #[tokio::test]
    async fn skips_excluded_titles() {
        let store = MemoryKnowledgeStore::new();
        let reconciler = Reconciler::new(Arc::new(store.clone()));
        let source = source().with_exclusions(["sponsored"]);
        let items = vec![
            item("Sponsored: Buy Now", "ad", "<p>Buy</p>"),
            item("Markets rally", "news", "<p>Up</p>"),
        ];

        assert_eq!(reconciler.reconcile(&source, &items).await, 1);
        assert!(store.get_record(article_id(&items[0])).await.is_none());
        assert!(store.get_record(article_id(&items[1])).await.is_some());
    }

    #[tokio::test]
    async fn category_fragments_follow_body() {
        let store = MemoryKnowledgeStore::new();
        let reconciler = Reconciler::new(Arc::new(store.clone()));
        let mut tagged = item("Coins", "c", "<p>Body</p>");
        tagged.categories = vec![crate::types::RawCategory {
            domain: Some("tag".to_string()),
            label: "Bitcoin".to_string(),
        }];

        reconciler
            .reconcile(&source().with_category_tags(true), &[tagged.clone()])
            .await;

        let record = store.get_record(article_id(&tagged)).await.unwrap();
        assert_eq!(record.fragments.len(), 2);
        assert_eq!(record.fragments[0], "coins body");
        assert!(record.fragments[1].starts_with("why is bitcoin up or down"));
    }

    #[tokio::test]
    async fn uses_publish_date_when_present() {
        let store = MemoryKnowledgeStore::new();
        let reconciler = Reconciler::new(Arc::new(store.clone()));
        let published: DateTime<Utc> = Utc::now() - Duration::days(1);
        let mut dated = item("Dated", "d", "<p>x</p>");
        dated.published_at = Some(published);

        reconciler.reconcile(&source(), &[dated.clone()]).await;

        let record = store.get_record(article_id(&dated)).await.unwrap();
        assert_eq!(record.created_at, published);
    }

    struct FailingStore {
        inner: MemoryKnowledgeStore,
    }

    #[async_trait]
    impl KnowledgeStore for FailingStore {
        async fn create_record(&self, record: KnowledgeRecord) -> StoreResult<()> {
            if record.text.contains("Broken") {
                return Err(StoreError::Unavailable("write failed".to_string()));
            }
            self.inner.create_record(record).await
        }

        async fn record_exists(&self, id: Uuid) -> StoreResult<bool> {
            self.inner.record_exists(id).await
        }

        async fn delete_record(&self, id: Uuid) -> StoreResult<()> {
            self.inner.delete_record(id).await
        }

        async fn delete_fragments_by_source(&self, source: Uuid) -> StoreResult<u64> {
            self.inner.delete_fragments_by_source(source).await
        }

        async fn delete_records_older_than(
            &self,
            owner_id: Uuid,
            cutoff: DateTime<Utc>,
            kind: Option<RecordKind>,
        ) -> StoreResult<u64> {
            self.inner
                .delete_records_older_than(owner_id, cutoff, kind)
                .await
        }

        async fn embed(&self, text: &str) -> StoreResult<Vec<f32>> {
            self.inner.embed(text).await
        }
    }

    #[tokio::test]
    async fn store_failure_does_not_stop_siblings() {
        let inner = MemoryKnowledgeStore::new();
        let store = FailingStore {
            inner: inner.clone(),
        };
        let reconciler = Reconciler::new(Arc::new(store)).with_concurrency(1);
        let items = vec![
            item("Broken item", "b", "<p>x</p>"),
            item("Fine item", "f", "<p>y</p>"),
        ];

        assert_eq!(reconciler.reconcile(&source(), &items).await, 1);
        assert_eq!(inner.record_count().await, 1);
    }

    #[tokio::test]
    async fn duplicate_on_create_counts_as_skip() {
        let store = MemoryKnowledgeStore::new();
        let reconciler = Reconciler::new(Arc::new(store.clone()));
        let one = item("One", "1", "<p>x</p>");

        // same item twice in one batch races through the existence check
        let added = reconciler.reconcile(&source(), &[one.clone(), one]).await;
        assert_eq!(added, 1);
        assert_eq!(store.record_count().await, 1);
    }

    /// Tracks how many existence checks are in flight at once.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryKnowledgeStore,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl KnowledgeStore for CountingStore {
        async fn create_record(&self, record: KnowledgeRecord) -> StoreResult<()> {
            self.inner.create_record(record).await
        }

        async fn record_exists(&self, id: Uuid) -> StoreResult<bool> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.inner.record_exists(id).await
        }

        async fn delete_record(&self, id: Uuid) -> StoreResult<()> {
            self.inner.delete_record(id).await
        }

        async fn delete_fragments_by_source(&self, source: Uuid) -> StoreResult<u64> {
            self.inner.delete_fragments_by_source(source).await
        }

        async fn delete_records_older_than(
            &self,
            owner_id: Uuid,
            cutoff: DateTime<Utc>,
            kind: Option<RecordKind>,
        ) -> StoreResult<u64> {
            self.inner
                .delete_records_older_than(owner_id, cutoff, kind)
                .await
        }

        async fn embed(&self, text: &str) -> StoreResult<Vec<f32>> {
            self.inner.embed(text).await
        }
    }

    #[tokio::test]
    async fn at_most_ten_items_in_flight() {
        let store = Arc::new(CountingStore::default());
        let reconciler = Reconciler::new(store.clone());
        let items: Vec<RawItem> = (0..25)
            .map(|n| item(&format!("Item {n}"), &n.to_string(), "<p>x</p>"))
            .collect();

        assert_eq!(reconciler.reconcile(&source(), &items).await, 25);

        let peak = store.peak.load(Ordering::SeqCst);
        assert!(peak <= DEFAULT_ITEM_CONCURRENCY, "peak was {peak}");
        assert!(peak > 1, "items ran one at a time");
        assert_eq!(store.inner.record_count().await, 25);
    }

    #[test]
    fn reconcile_future_can_be_spawned() {
        fn assert_send<T: Send>(_: T) {}

        let reconciler = Reconciler::new(Arc::new(MemoryKnowledgeStore::new()));
        let source = source();
        let items = vec![item("One", "1", "<p>x</p>")];
        assert_send(reconciler.reconcile(&source, &items));
    }
}
