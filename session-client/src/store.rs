//! Persistence backends for the durable queue.
//!
//! The queue persists its pending entries after every mutation so a crash
//! or restart loses nothing. [`JsonFileStore`] is the production backend;
//! [`MemoryStore`] backs tests and the degraded mode entered when the
//! filesystem is unavailable.

use async_trait::async_trait;
use session_types::QueuedRequest;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Errors from queue persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem operation failed.
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be encoded or decoded.
    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Storage backend for queued requests.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Load the persisted entries, oldest first. An absent store yields an
    /// empty list.
    async fn load(&self) -> Result<Vec<QueuedRequest>, StoreError>;

    /// Replace the persisted entries with the given snapshot.
    async fn save(&self, entries: &[QueuedRequest]) -> Result<(), StoreError>;
}

/// File-backed store writing a JSON snapshot of the queue.
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Create a store persisting to the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path the snapshot is written to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl QueueStore for JsonFileStore {
    async fn load(&self) -> Result<Vec<QueuedRequest>, StoreError> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&data)?)
    }

    async fn save(&self, entries: &[QueuedRequest]) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// In-memory store. Used in tests and as the fallback when file storage
/// fails.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Vec<QueuedRequest>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn load(&self) -> Result<Vec<QueuedRequest>, StoreError> {
        Ok(self.entries.lock().unwrap().clone())
    }

    async fn save(&self, entries: &[QueuedRequest]) -> Result<(), StoreError> {
        *self.entries.lock().unwrap() = entries.to_vec();
        Ok(())
    }
}
