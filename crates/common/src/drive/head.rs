use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use iroh_blobs::Hash;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum HeadStoreError {
    #[error("head store i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("head store codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Durable pointer to the newest snapshot in a drive's chain
///
/// The chain itself lives in the content store; this is the one piece of
/// mutable state that says where it currently ends. A writer persists it so
/// a restarted sender resumes at its last committed version. Replicas keep
/// it in memory and rebuild on every join.
#[async_trait]
pub trait HeadStore: Send + Sync + std::fmt::Debug {
    async fn load(&self) -> Result<Option<(Hash, u64)>, HeadStoreError>;
    async fn save(&self, head: Hash, version: u64) -> Result<(), HeadStoreError>;
}

/// In-memory head store for replicas and tests
#[derive(Debug, Clone, Default)]
pub struct MemoryHeadStore {
    inner: Arc<Mutex<Option<(Hash, u64)>>>,
}

impl MemoryHeadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HeadStore for MemoryHeadStore {
    async fn load(&self) -> Result<Option<(Hash, u64)>, HeadStoreError> {
        Ok(*self.inner.lock())
    }

    async fn save(&self, head: Hash, version: u64) -> Result<(), HeadStoreError> {
        *self.inner.lock() = Some((head, version));
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct HeadRecord {
    head: Hash,
    version: u64,
}

/// Head pointer persisted as a JSON sidecar file next to the store
///
/// Writes go through a temp file and a rename, so a crash mid-save leaves
/// either the old pointer or the new one, never a torn file.
#[derive(Debug, Clone)]
pub struct FsHeadStore {
    path: PathBuf,
}

impl FsHeadStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl HeadStore for FsHeadStore {
    async fn load(&self) -> Result<Option<(Hash, u64)>, HeadStoreError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: HeadRecord = serde_json::from_slice(&bytes)?;
        Ok(Some((record.head, record.version)))
    }

    async fn save(&self, head: Hash, version: u64) -> Result<(), HeadStoreError> {
        let record = HeadRecord { head, version };
        let bytes = serde_json::to_vec_pretty(&record)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_round_trip() {
        let store = MemoryHeadStore::new();
        assert!(store.load().await.unwrap().is_none());

        let hash = Hash::from_bytes([1u8; 32]);
        store.save(hash, 3).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some((hash, 3)));
    }

    #[tokio::test]
    async fn test_fs_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("HEAD.json");

        let store = FsHeadStore::new(path.clone());
        assert!(store.load().await.unwrap().is_none());

        let hash = Hash::from_bytes([9u8; 32]);
        store.save(hash, 12).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some((hash, 12)));

        // a fresh handle reads the same pointer back
        let reopened = FsHeadStore::new(path);
        assert_eq!(reopened.load().await.unwrap(), Some((hash, 12)));
    }

    #[tokio::test]
    async fn test_fs_save_overwrites() {
        let temp = TempDir::new().unwrap();
        let store = FsHeadStore::new(temp.path().join("HEAD.json"));

        store.save(Hash::from_bytes([1u8; 32]), 1).await.unwrap();
        store.save(Hash::from_bytes([2u8; 32]), 2).await.unwrap();
        assert_eq!(
            store.load().await.unwrap(),
            Some((Hash::from_bytes([2u8; 32]), 2))
        );
    }
}
