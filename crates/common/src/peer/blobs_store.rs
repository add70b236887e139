use std::future::IntoFuture;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use anyhow::anyhow;
use bytes::Bytes;
use futures::Stream;
use iroh::{Endpoint, NodeId};
use iroh_blobs::{
    api::{
        blobs::{BlobStatus, Blobs},
        downloader::{Downloader, Shuffled},
        ExportBaoError, RequestError,
    },
    store::{fs::FsStore, mem::MemStore},
    BlobsProtocol, Hash,
};

use crate::crypto::PublicKey;

/// Client over a local iroh-blob store.
///
/// This is the content store: a content-addressed map from BLAKE3 hash to
/// block bytes. Identical bytes always land on the same hash, so re-storing
/// a block is free. It also exposes an iroh-blobs peer over the endpoint;
/// the router must handle the iroh-blobs ALPN for remote fetches to work.
#[derive(Clone, Debug)]
pub struct BlobsStore {
    pub inner: Arc<BlobsProtocol>,
}

impl Deref for BlobsStore {
    type Target = Arc<BlobsProtocol>;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("export bao error: {0}")]
    ExportBao(#[from] ExportBaoError),
    #[error("request error: {0}")]
    Request(#[from] RequestError),
    #[error("block {0} not present after download")]
    MissingBlob(Hash),
}

impl BlobsStore {
    /// Open a durable store rooted at the given path.
    ///
    /// The store outlives the process; blocks written here survive restart.
    pub async fn fs(path: &Path) -> Result<Self, StoreError> {
        let store = FsStore::load(path).await?;
        let blobs = BlobsProtocol::new(&store, None);
        Ok(Self {
            inner: Arc::new(blobs),
        })
    }

    /// Open an in-memory store. Used by tests and throwaway peers.
    pub async fn memory() -> Result<Self, StoreError> {
        let store = MemStore::new();
        let blobs = BlobsProtocol::new(&store, None);
        Ok(Self {
            inner: Arc::new(blobs),
        })
    }

    /// Get a handle to the underlying blobs client against the store
    pub fn blobs(&self) -> &Blobs {
        self.inner.store().blobs()
    }

    /// Get a block as bytes
    pub async fn get(&self, hash: &Hash) -> Result<Bytes, StoreError> {
        let bytes = self.blobs().get_bytes(*hash).await?;
        Ok(bytes)
    }

    /// Store a stream of bytes as a block
    pub async fn put_stream(
        &self,
        stream: impl Stream<Item = std::io::Result<Bytes>> + Send + Unpin + 'static + std::marker::Sync,
    ) -> Result<Hash, StoreError> {
        let outcome = self
            .blobs()
            .add_stream(stream)
            .into_future()
            .await
            .with_tag()
            .await?
            .hash;
        Ok(outcome)
    }

    /// Store a vec of bytes as a block
    pub async fn put(&self, data: Vec<u8>) -> Result<Hash, StoreError> {
        let hash = self.blobs().add_bytes(data).into_future().await?.hash;
        Ok(hash)
    }

    /// Whether a block is fully present locally
    pub async fn stat(&self, hash: &Hash) -> Result<bool, StoreError> {
        let stat = self
            .blobs()
            .status(*hash)
            .await
            .map_err(|err| StoreError::Default(anyhow!(err)))?;
        Ok(matches!(stat, BlobStatus::Complete { .. }))
    }

    /// Fetch a single block from candidate peers
    ///
    /// Skips the transfer entirely if the block is already present. The
    /// transfer itself is BLAKE3-verified, so a corrupt or truncated
    /// response never lands in the store; presence is re-checked after the
    /// download to surface that as an error.
    pub async fn download(
        &self,
        hash: Hash,
        peer_ids: Vec<PublicKey>,
        endpoint: &Endpoint,
    ) -> Result<(), StoreError> {
        if self.stat(&hash).await? {
            tracing::trace!("block {} already present, skipping download", hash);
            return Ok(());
        }

        tracing::debug!("downloading block {} from {} peers", hash, peer_ids.len());

        let downloader = Downloader::new(self.inner.store(), endpoint);
        let discovery = Shuffled::new(
            peer_ids
                .iter()
                .map(|peer_id| NodeId::from(*peer_id))
                .collect(),
        );

        downloader
            .download(hash, discovery)
            .await
            .map_err(|e| StoreError::Default(anyhow!("download of {} failed: {}", hash, e)))?;

        if !self.stat(&hash).await? {
            return Err(StoreError::MissingBlob(hash));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;
    use tempfile::TempDir;

    async fn setup_test_store() -> (BlobsStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let blob_path = temp_dir.path().join("blobs");
        let blobs = BlobsStore::fs(&blob_path).await.unwrap();
        (blobs, temp_dir)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (store, _temp) = setup_test_store().await;

        let data = b"Hello, BlobsStore!";

        let hash = store.put(data.to_vec()).await.unwrap();
        let retrieved = store.get(&hash).await.unwrap();
        assert_eq!(retrieved.as_ref(), data);
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let (store, _temp) = setup_test_store().await;

        let data = b"same bytes, same block";

        let first = store.put(data.to_vec()).await.unwrap();
        let second = store.put(data.to_vec()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.get(&first).await.unwrap().as_ref(), data);
    }

    #[tokio::test]
    async fn test_put_stream() {
        let (store, _temp) = setup_test_store().await;

        let data = b"Streaming data test";
        let stream =
            stream::once(async move { Ok::<_, std::io::Error>(Bytes::from(data.to_vec())) });

        let hash = store.put_stream(Box::pin(stream)).await.unwrap();

        let retrieved = store.get(&hash).await.unwrap();
        assert_eq!(retrieved.as_ref(), data);
    }

    #[tokio::test]
    async fn test_stat() {
        let (store, _temp) = setup_test_store().await;

        let data = b"Test data for stat";
        let hash = store.put(data.to_vec()).await.unwrap();

        assert!(store.stat(&hash).await.unwrap());

        let fake_hash = iroh_blobs::Hash::from_bytes([0u8; 32]);
        assert!(!store.stat(&fake_hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let blob_path = temp_dir.path().join("blobs");

        let data = b"durable bytes";
        let hash = {
            let store = BlobsStore::fs(&blob_path).await.unwrap();
            store.put(data.to_vec()).await.unwrap()
        };

        let reopened = BlobsStore::fs(&blob_path).await.unwrap();
        assert!(reopened.stat(&hash).await.unwrap());
        assert_eq!(reopened.get(&hash).await.unwrap().as_ref(), data);
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let (store, _temp) = setup_test_store().await;

        let fake_hash = iroh_blobs::Hash::from_bytes([99u8; 32]);
        let result = store.get(&fake_hash).await;

        assert!(result.is_err());
    }
}
