//! Durable session metadata storage.
//!
//! Records are keyed by session id and recoverable by resume-token hash.
//! Raw tokens never reach a store.

pub mod error;
pub mod file;
pub mod memory;

use async_trait::async_trait;
use gateway_core::SessionMetadata;

pub use error::{StoreError, StoreResult};
pub use file::FileStore;
pub use memory::MemoryStore;

/// Storage interface for session metadata.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert or replace the record for `meta.session_id`.
    ///
    /// Must be atomic: either the new record is durable or the old one stays.
    async fn upsert(&self, meta: &SessionMetadata) -> StoreResult<()>;

    /// Load a record by session id.
    async fn lookup(&self, session_id: &str) -> StoreResult<Option<SessionMetadata>>;

    /// Load the record currently holding `token_hash`.
    ///
    /// Closed sessions have no token hash and are never returned here.
    async fn lookup_by_token_hash(&self, token_hash: &str) -> StoreResult<Option<SessionMetadata>>;

    /// All records, for startup recovery.
    async fn load_all(&self) -> StoreResult<Vec<SessionMetadata>>;
}
