use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// One record per feed item.
    Article,
    /// The rolling "latest headlines" digest of a feed.
    Headline,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Article => "article",
            RecordKind::Headline => "headline",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "article" => Some(RecordKind::Article),
            "headline" => Some(RecordKind::Headline),
            _ => None,
        }
    }
}

/// A document committed to the knowledge store together with the fragments
/// that get embedded for retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    pub id: Uuid,
    /// Owning feed source. Expiration is scoped by this id.
    pub owner_id: Uuid,
    pub kind: RecordKind,
    pub text: String,
    pub url: Option<String>,
    pub source_url: String,
    pub created_at: DateTime<Utc>,
    pub fragments: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    pub id: Uuid,
    /// Back-reference to the parent record.
    pub source: Uuid,
    pub owner_id: Uuid,
    pub text: String,
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

impl Fragment {
    /// Fragment ids are namespaced by their parent so the same text under two
    /// records never collides.
    pub fn fragment_id(parent: Uuid, text: &str) -> Uuid {
        let key = format!("{parent}{text}");
        Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub details: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Record already exists: {id}")]
    Duplicate { id: Uuid },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Invalid stored value: {0}")]
    InvalidData(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Produces vector embeddings for fragment text.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> StoreResult<Vec<f32>>;
}

/// Capabilities the ingestion core needs from the document/fragment store.
///
/// Backends must reject a second record with the same id
/// (`StoreError::Duplicate`); the existence check callers do beforehand is
/// only an optimisation.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn create_record(&self, record: KnowledgeRecord) -> StoreResult<()>;

    async fn record_exists(&self, id: Uuid) -> StoreResult<bool>;

    /// Removes the record and its fragments. Absent ids are not an error.
    async fn delete_record(&self, id: Uuid) -> StoreResult<()>;

    /// Removes every fragment whose back-reference equals `source`.
    async fn delete_fragments_by_source(&self, source: Uuid) -> StoreResult<u64>;

    /// Bulk deletion of records (and their fragments) owned by `owner_id`
    /// created strictly before `cutoff`. `kind` narrows the sweep to one
    /// record kind. Returns the number of records deleted.
    async fn delete_records_older_than(
        &self,
        owner_id: Uuid,
        cutoff: DateTime<Utc>,
        kind: Option<RecordKind>,
    ) -> StoreResult<u64>;

    fn preprocess(&self, text: &str) -> String {
        crate::text::preprocess(text)
    }

    async fn embed(&self, text: &str) -> StoreResult<Vec<f32>>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_account(&self, id: Uuid) -> StoreResult<Option<Account>>;

    async fn create_account(&self, account: Account) -> StoreResult<()>;

    /// Creates the account unless one with the same id exists. Returns true
    /// when a new account was written.
    async fn ensure_account(&self, account: Account) -> StoreResult<bool> {
        if self.get_account(account.id).await?.is_some() {
            return Ok(false);
        }
        self.create_account(account).await?;
        Ok(true)
    }
}
