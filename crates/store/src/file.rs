//! File-backed metadata store.
//!
//! One JSON object keyed by session id. Every write replaces the whole file
//! via write-to-temp-then-rename, so readers never see a torn file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use gateway_core::SessionMetadata;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{MetadataStore, StoreError, StoreResult};

type Records = BTreeMap<String, SessionMetadata>;

/// File-backed store. The file is loaded once at open and kept in memory;
/// the in-memory copy only advances after the rename succeeds.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    records: Mutex<Records>,
}

impl FileStore {
    /// Open (or create on first write) the store at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let records = load(&path).await?;
        info!(path = %path.display(), records = records.len(), "Opened session metadata store");
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "sessions.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn persist(&self, records: &Records) -> StoreResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }

        let data = serde_json::to_vec_pretty(records)?;
        let temp_path = self.temp_path();

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options
            .open(&temp_path)
            .await
            .map_err(|e| StoreError::io(&temp_path, e))?;
        file.write_all(&data)
            .await
            .map_err(|e| StoreError::io(&temp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| StoreError::io(&temp_path, e))?;
        drop(file);

        // Atomic rename
        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;

        debug!(path = %self.path.display(), records = records.len(), "Persisted session metadata");
        Ok(())
    }
}

async fn load(path: &Path) -> StoreResult<Records> {
    match fs::read(path).await {
        Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(Records::new()),
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| StoreError::FileDeserialization {
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Records::new()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

#[async_trait]
impl MetadataStore for FileStore {
    async fn upsert(&self, meta: &SessionMetadata) -> StoreResult<()> {
        let mut records = self.records.lock().await;
        let mut next = records.clone();
        next.insert(meta.session_id.clone(), meta.clone());
        self.persist(&next).await?;
        *records = next;
        Ok(())
    }

    async fn lookup(&self, session_id: &str) -> StoreResult<Option<SessionMetadata>> {
        Ok(self.records.lock().await.get(session_id).cloned())
    }

    async fn lookup_by_token_hash(&self, token_hash: &str) -> StoreResult<Option<SessionMetadata>> {
        Ok(self
            .records
            .lock()
            .await
            .values()
            .find(|m| m.token_hash.as_deref() == Some(token_hash))
            .cloned())
    }

    async fn load_all(&self) -> StoreResult<Vec<SessionMetadata>> {
        Ok(self.records.lock().await.values().cloned().collect())
    }
}
