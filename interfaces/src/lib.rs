pub mod defs;
pub mod memory;
pub mod state;
pub mod text;

pub use defs::{
    Account, AccountStore, Embedder, Fragment, KnowledgeRecord, KnowledgeStore, RecordKind,
    StoreError, StoreResult,
};
pub use memory::MemoryKnowledgeStore;
pub use state::SqliteKnowledgeStore;
