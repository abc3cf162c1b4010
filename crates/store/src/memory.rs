//! In-memory metadata store.

use std::collections::HashMap;

use async_trait::async_trait;
use gateway_core::SessionMetadata;
use parking_lot::Mutex;

use crate::{MetadataStore, StoreResult};

/// Process-lifetime store, used when no state path is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, SessionMetadata>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn upsert(&self, meta: &SessionMetadata) -> StoreResult<()> {
        self.records
            .lock()
            .insert(meta.session_id.clone(), meta.clone());
        Ok(())
    }

    async fn lookup(&self, session_id: &str) -> StoreResult<Option<SessionMetadata>> {
        Ok(self.records.lock().get(session_id).cloned())
    }

    async fn lookup_by_token_hash(&self, token_hash: &str) -> StoreResult<Option<SessionMetadata>> {
        Ok(self
            .records
            .lock()
            .values()
            .find(|m| m.token_hash.as_deref() == Some(token_hash))
            .cloned())
    }

    async fn load_all(&self) -> StoreResult<Vec<SessionMetadata>> {
        Ok(self.records.lock().values().cloned().collect())
    }
}
