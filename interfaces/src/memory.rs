use crate::defs::{
    Account, AccountStore, Embedder, Fragment, KnowledgeRecord, KnowledgeStore, RecordKind,
    StoreError, StoreResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    records: HashMap<Uuid, KnowledgeRecord>,
    fragments: HashMap<Uuid, Fragment>,
    accounts: HashMap<Uuid, Account>,
}

/// In-process knowledge store. Useful for tests and for running the pipeline
/// without a database.
#[derive(Clone, Default)]
pub struct MemoryKnowledgeStore {
    inner: Arc<RwLock<Inner>>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl MemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub async fn get_record(&self, id: Uuid) -> Option<KnowledgeRecord> {
        self.inner.read().await.records.get(&id).cloned()
    }

    pub async fn records_by_owner(&self, owner_id: Uuid) -> Vec<KnowledgeRecord> {
        let inner = self.inner.read().await;
        let mut records: Vec<KnowledgeRecord> = inner
            .records
            .values()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    pub async fn fragments_for(&self, source: Uuid) -> Vec<Fragment> {
        let inner = self.inner.read().await;
        inner
            .fragments
            .values()
            .filter(|f| f.source == source)
            .cloned()
            .collect()
    }

    pub async fn record_count(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn fragment_count(&self) -> usize {
        self.inner.read().await.fragments.len()
    }
}

#[async_trait]
impl KnowledgeStore for MemoryKnowledgeStore {
    async fn create_record(&self, record: KnowledgeRecord) -> StoreResult<()> {
        // Embeddings are computed before taking the write lock.
        let now = Utc::now();
        let mut fragments = Vec::with_capacity(record.fragments.len());
        for text in &record.fragments {
            let embedding = match &self.embedder {
                Some(embedder) => Some(embedder.embed(text).await?),
                None => None,
            };
            fragments.push(Fragment {
                id: Fragment::fragment_id(record.id, text),
                source: record.id,
                owner_id: record.owner_id,
                text: text.clone(),
                embedding,
                created_at: now,
            });
        }

        let mut inner = self.inner.write().await;
        if inner.records.contains_key(&record.id) {
            return Err(StoreError::Duplicate { id: record.id });
        }
        for fragment in fragments {
            inner.fragments.insert(fragment.id, fragment);
        }
        debug!("Stored {} record {}", record.kind.as_str(), record.id);
        inner.records.insert(record.id, record);
        Ok(())
    }

    async fn record_exists(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.inner.read().await.records.contains_key(&id))
    }

    async fn delete_record(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.records.remove(&id);
        inner.fragments.retain(|_, f| f.source != id);
        Ok(())
    }

    async fn delete_fragments_by_source(&self, source: Uuid) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let before = inner.fragments.len();
        inner.fragments.retain(|_, f| f.source != source);
        Ok((before - inner.fragments.len()) as u64)
    }

    async fn delete_records_older_than(
        &self,
        owner_id: Uuid,
        cutoff: DateTime<Utc>,
        kind: Option<RecordKind>,
    ) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let expired: Vec<Uuid> = inner
            .records
            .values()
            .filter(|r| r.owner_id == owner_id && r.created_at < cutoff)
            .filter(|r| kind.map_or(true, |k| r.kind == k))
            .map(|r| r.id)
            .collect();

        for id in &expired {
            inner.records.remove(id);
        }
        inner.fragments.retain(|_, f| !expired.contains(&f.source));
        Ok(expired.len() as u64)
    }

    async fn embed(&self, text: &str) -> StoreResult<Vec<f32>> {
        match &self.embedder {
            Some(embedder) => embedder.embed(text).await,
            None => Err(StoreError::Embedding("no embedder configured".to_string())),
        }
    }
}

#[async_trait]
impl AccountStore for MemoryKnowledgeStore {
    async fn get_account(&self, id: Uuid) -> StoreResult<Option<Account>> {
        Ok(self.inner.read().await.accounts.get(&id).cloned())
    }

    async fn create_account(&self, account: Account) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.accounts.contains_key(&account.id) {
            return Err(StoreError::Duplicate { id: account.id });
        }
        inner.accounts.insert(account.id, account);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    struct LengthEmbedder;

    #[async_trait]
    impl Embedder for LengthEmbedder {
        async fn embed(&self, text: &str) -> StoreResult<Vec<f32>> {
            Ok(vec![text.len() as f32])
        }
    }

    fn record(
        owner_id: Uuid,
        kind: RecordKind,
        age_days: i64,
        fragments: &[&str],
    ) -> KnowledgeRecord {
        KnowledgeRecord {
            id: Uuid::new_v4(),
            owner_id,
            kind,
            text: "text".to_string(),
            url: None,
            source_url: "https://example.com/feed.xml".to_string(),
            created_at: Utc::now() - Duration::days(age_days),
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn rejects_duplicate_ids() {
        let store = MemoryKnowledgeStore::new();
        let rec = record(Uuid::new_v4(), RecordKind::Article, 0, &["a"]);
        store.create_record(rec.clone()).await.unwrap();

        let err = store.create_record(rec.clone()).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { id } if id == rec.id));
        assert!(store.record_exists(rec.id).await.unwrap());
    }

    #[tokio::test]
    async fn delete_record_removes_fragments() {
        let store = MemoryKnowledgeStore::new();
        let rec = record(Uuid::new_v4(), RecordKind::Headline, 0, &["a", "b"]);
        store.create_record(rec.clone()).await.unwrap();
        assert_eq!(store.fragments_for(rec.id).await.len(), 2);

        store.delete_record(rec.id).await.unwrap();
        assert!(!store.record_exists(rec.id).await.unwrap());
        assert_eq!(store.fragment_count().await, 0);

        // absent ids are fine
        store.delete_record(rec.id).await.unwrap();
    }

    #[tokio::test]
    async fn sweeps_by_owner_age_and_kind() {
        let store = MemoryKnowledgeStore::new();
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();
        let old = record(owner, RecordKind::Article, 4, &["old"]);
        let fresh = record(owner, RecordKind::Article, 2, &["fresh"]);
        let old_headline = record(owner, RecordKind::Headline, 5, &["digest"]);
        let foreign = record(other, RecordKind::Article, 10, &["foreign"]);
        for r in [&old, &fresh, &old_headline, &foreign] {
            store.create_record(r.clone()).await.unwrap();
        }

        let cutoff = Utc::now() - Duration::days(3);
        let deleted = store
            .delete_records_older_than(owner, cutoff, Some(RecordKind::Article))
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert!(!store.record_exists(old.id).await.unwrap());
        assert!(store.fragments_for(old.id).await.is_empty());
        assert!(store.record_exists(fresh.id).await.unwrap());
        assert!(store.record_exists(old_headline.id).await.unwrap());
        assert!(store.record_exists(foreign.id).await.unwrap());

        let deleted = store
            .delete_records_older_than(owner, cutoff, None)
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(!store.record_exists(old_headline.id).await.unwrap());
    }

    #[tokio::test]
    async fn computes_embeddings_when_configured() {
        let store = MemoryKnowledgeStore::new().with_embedder(Arc::new(LengthEmbedder));
        let rec = record(Uuid::new_v4(), RecordKind::Article, 0, &["four"]);
        store.create_record(rec.clone()).await.unwrap();

        let fragments = store.fragments_for(rec.id).await;
        assert_eq!(fragments[0].embedding, Some(vec![4.0]));
        assert_eq!(store.embed("abc").await.unwrap(), vec![3.0]);
        assert!(MemoryKnowledgeStore::new().embed("abc").await.is_err());
    }

    #[tokio::test]
    async fn ensure_account_is_idempotent() {
        let store = MemoryKnowledgeStore::new();
        let account = Account {
            id: Uuid::new_v4(),
            name: "Feed".to_string(),
            details: serde_json::json!({ "type": "rss-feed" }),
        };
        assert!(store.ensure_account(account.clone()).await.unwrap());
        assert!(!store.ensure_account(account.clone()).await.unwrap());
        let stored = store.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "Feed");
    }
}
