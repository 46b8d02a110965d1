use crate::defs::{
    Account, AccountStore, Embedder, Fragment, KnowledgeRecord, KnowledgeStore, RecordKind,
    StoreError, StoreResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// SQLite-backed knowledge store. Documents and fragments live in separate
/// tables; fragments point at their document through `source_id`.
pub struct SqliteKnowledgeStore {
    pool: SqlitePool,
    embedder: Option<Arc<dyn Embedder>>,
}

impl SqliteKnowledgeStore {
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true);
        // An in-memory database only exists per connection.
        let in_memory = database_url.contains(":memory:");
        let max_connections = if in_memory { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            embedder: None,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn setup_schema(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                text TEXT NOT NULL,
                url TEXT,
                source_url TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS fragments (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                text TEXT NOT NULL,
                embedding BLOB,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                details TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_documents_owner_created \
             ON documents (owner_id, created_at)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_fragments_source ON fragments (source_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn get_record(&self, id: Uuid) -> StoreResult<Option<KnowledgeRecord>> {
        let row = sqlx::query(
            "SELECT id, owner_id, kind, text, url, source_url, created_at \
             FROM documents WHERE id = ?1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let kind: String = row.try_get("kind")?;
        let record = KnowledgeRecord {
            id,
            owner_id: parse_uuid(&row.try_get::<String, _>("owner_id")?)?,
            kind: RecordKind::parse(&kind).ok_or_else(|| {
                StoreError::InvalidData(format!("unknown record kind {kind}"))
            })?,
            text: row.try_get("text")?,
            url: row.try_get("url")?,
            source_url: row.try_get("source_url")?,
            created_at: from_millis(row.try_get("created_at")?)?,
            fragments: self.fragment_texts(id).await?,
        };
        Ok(Some(record))
    }

    pub async fn fragment_texts(&self, source: Uuid) -> StoreResult<Vec<String>> {
        let rows = sqlx::query("SELECT text FROM fragments WHERE source_id = ?1 ORDER BY position")
            .bind(source.to_string())
            .fetch_all(&self.pool)
            .await?;
        let mut texts = Vec::with_capacity(rows.len());
        for row in rows {
            texts.push(row.try_get("text")?);
        }
        Ok(texts)
    }

    pub async fn record_count(&self) -> StoreResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("count")?)
    }

    /// Computes embeddings for fragments stored without one. Returns how many
    /// fragments were updated.
    pub async fn backfill_embeddings(&self, limit: usize) -> StoreResult<usize> {
        let Some(embedder) = &self.embedder else {
            return Err(StoreError::Embedding("no embedder configured".to_string()));
        };

        let rows = sqlx::query("SELECT id, text FROM fragments WHERE embedding IS NULL LIMIT ?1")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut updated = 0;
        for row in rows {
            let id: String = row.try_get("id")?;
            let text: String = row.try_get("text")?;
            let embedding = embedder.embed(&text).await?;
            sqlx::query("UPDATE fragments SET embedding = ?1 WHERE id = ?2")
                .bind(encode_embedding(&embedding))
                .bind(id)
                .execute(&self.pool)
                .await?;
            updated += 1;
        }

        if updated > 0 {
            info!("Backfilled embeddings for {} fragments", updated);
        }
        Ok(updated)
    }
}

#[async_trait]
impl KnowledgeStore for SqliteKnowledgeStore {
    async fn create_record(&self, record: KnowledgeRecord) -> StoreResult<()> {
        let mut embeddings = Vec::with_capacity(record.fragments.len());
        for text in &record.fragments {
            embeddings.push(match &self.embedder {
                Some(embedder) => Some(encode_embedding(&embedder.embed(text).await?)),
                None => None,
            });
        }

        let now = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO documents (id, owner_id, kind, text, url, source_url, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.owner_id.to_string())
        .bind(record.kind.as_str())
        .bind(&record.text)
        .bind(record.url.as_deref())
        .bind(&record.source_url)
        .bind(record.created_at.timestamp_millis())
        .execute(&mut *tx)
        .await;

        match inserted {
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(StoreError::Duplicate { id: record.id });
            }
            other => {
                other?;
            }
        }

        for (position, (text, embedding)) in record.fragments.iter().zip(embeddings).enumerate() {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO fragments
                    (id, source_id, owner_id, position, text, embedding, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(Fragment::fragment_id(record.id, text).to_string())
            .bind(record.id.to_string())
            .bind(record.owner_id.to_string())
            .bind(position as i64)
            .bind(text)
            .bind(embedding)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(
            "Stored {} record {} with {} fragments",
            record.kind.as_str(),
            record.id,
            record.fragments.len()
        );
        Ok(())
    }

    async fn record_exists(&self, id: Uuid) -> StoreResult<bool> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM documents WHERE id = ?1")
            .bind(id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("count")? > 0)
    }

    async fn delete_record(&self, id: Uuid) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM fragments WHERE source_id = ?1")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM documents WHERE id = ?1")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_fragments_by_source(&self, source: Uuid) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM fragments WHERE source_id = ?1")
            .bind(source.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_records_older_than(
        &self,
        owner_id: Uuid,
        cutoff: DateTime<Utc>,
        kind: Option<RecordKind>,
    ) -> StoreResult<u64> {
        let owner = owner_id.to_string();
        let cutoff = cutoff.timestamp_millis();
        let kind = kind.map(|k| k.as_str());
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM fragments WHERE source_id IN (
                SELECT id FROM documents
                WHERE owner_id = ?1 AND created_at < ?2 AND (?3 IS NULL OR kind = ?3)
            )
            "#,
        )
        .bind(&owner)
        .bind(cutoff)
        .bind(kind)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query(
            r#"
            DELETE FROM documents
            WHERE owner_id = ?1 AND created_at < ?2 AND (?3 IS NULL OR kind = ?3)
            "#,
        )
        .bind(&owner)
        .bind(cutoff)
        .bind(kind)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn embed(&self, text: &str) -> StoreResult<Vec<f32>> {
        match &self.embedder {
            Some(embedder) => embedder.embed(text).await,
            None => Err(StoreError::Embedding("no embedder configured".to_string())),
        }
    }
}

#[async_trait]
impl AccountStore for SqliteKnowledgeStore {
    async fn get_account(&self, id: Uuid) -> StoreResult<Option<Account>> {
        let row = sqlx::query("SELECT name, details FROM accounts WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => {
                let details: String = r.try_get("details")?;
                Ok(Some(Account {
                    id,
                    name: r.try_get("name")?,
                    details: serde_json::from_str(&details)?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn create_account(&self, account: Account) -> StoreResult<()> {
        let result = sqlx::query(
            "INSERT INTO accounts (id, name, details, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(account.id.to_string())
        .bind(&account.name)
        .bind(serde_json::to_string(&account.details)?)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await;

        match result {
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::Duplicate { id: account.id })
            }
            other => {
                other?;
                Ok(())
            }
        }
    }
}

fn parse_uuid(value: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| StoreError::InvalidData(format!("{value}: {e}")))
}

fn from_millis(millis: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        StoreError::InvalidData(format!("timestamp out of range: {millis}"))
    })
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn setup() -> SqliteKnowledgeStore {
        let store = SqliteKnowledgeStore::connect("sqlite::memory:")
            .await
            .unwrap();
        store.setup_schema().await.unwrap();
        store
    }

    fn article(owner_id: Uuid, age_days: i64, fragments: &[&str]) -> KnowledgeRecord {
        KnowledgeRecord {
            id: Uuid::new_v4(),
            owner_id,
            kind: RecordKind::Article,
            text: "**Title**: body".to_string(),
            url: Some("https://example.com/a".to_string()),
            source_url: "https://example.com/feed.xml".to_string(),
            created_at: Utc::now() - Duration::days(age_days),
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
        }
    }

    struct ConstEmbedder;

    #[async_trait]
    impl Embedder for ConstEmbedder {
        async fn embed(&self, _text: &str) -> StoreResult<Vec<f32>> {
            Ok(vec![0.5, 0.25])
        }
    }

    #[tokio::test]
    async fn round_trips_records_with_ordered_fragments() {
        let store = setup().await;
        let rec = article(Uuid::new_v4(), 0, &["second paragraph", "first paragraph"]);
        store.create_record(rec.clone()).await.unwrap();

        let stored = store.get_record(rec.id).await.unwrap().unwrap();
        assert_eq!(stored.owner_id, rec.owner_id);
        assert_eq!(stored.kind, RecordKind::Article);
        assert_eq!(stored.fragments, rec.fragments);
        assert_eq!(
            stored.created_at.timestamp_millis(),
            rec.created_at.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn enforces_unique_record_ids() {
        let store = setup().await;
        let rec = article(Uuid::new_v4(), 0, &["a"]);
        store.create_record(rec.clone()).await.unwrap();

        let err = store.create_record(rec.clone()).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));
        assert_eq!(store.record_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn deletes_expired_articles_only() {
        let store = setup().await;
        let owner = Uuid::new_v4();
        let old = article(owner, 4, &["old"]);
        let fresh = article(owner, 2, &["fresh"]);
        let mut headline = article(owner, 6, &["digest"]);
        headline.kind = RecordKind::Headline;
        for r in [&old, &fresh, &headline] {
            store.create_record(r.clone()).await.unwrap();
        }

        let cutoff = Utc::now() - Duration::days(3);
        let deleted = store
            .delete_records_older_than(owner, cutoff, Some(RecordKind::Article))
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert!(!store.record_exists(old.id).await.unwrap());
        assert!(store.fragment_texts(old.id).await.unwrap().is_empty());
        assert!(store.record_exists(fresh.id).await.unwrap());
        assert!(store.record_exists(headline.id).await.unwrap());
    }

    #[tokio::test]
    async fn delete_record_and_fragments_by_source() {
        let store = setup().await;
        let rec = article(Uuid::new_v4(), 0, &["a", "b"]);
        store.create_record(rec.clone()).await.unwrap();

        assert_eq!(store.delete_fragments_by_source(rec.id).await.unwrap(), 2);
        store.delete_record(rec.id).await.unwrap();
        assert!(store.get_record(rec.id).await.unwrap().is_none());
        store.delete_record(rec.id).await.unwrap();
    }

    #[tokio::test]
    async fn backfills_missing_embeddings() {
        let plain = setup().await;
        let rec = article(Uuid::new_v4(), 0, &["a", "b"]);
        plain.create_record(rec).await.unwrap();
        assert!(plain.backfill_embeddings(10).await.is_err());

        let store = SqliteKnowledgeStore::new(plain.pool().clone())
            .with_embedder(Arc::new(ConstEmbedder));
        assert_eq!(store.backfill_embeddings(10).await.unwrap(), 2);
        assert_eq!(store.backfill_embeddings(10).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn accounts_are_created_once() {
        let store = setup().await;
        let account = Account {
            id: Uuid::new_v4(),
            name: "Example".to_string(),
            details: serde_json::json!({
                "type": "rss-feed",
                "url": "https://example.com/feed.xml"
            }),
        };
        assert!(store.ensure_account(account.clone()).await.unwrap());
        assert!(!store.ensure_account(account.clone()).await.unwrap());

        let stored = store.get_account(account.id).await.unwrap().unwrap();
        assert_eq!(stored.details["url"], "https://example.com/feed.xml");
    }
}
