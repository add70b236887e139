use iroh::protocol::Router;
use tokio::sync::watch::Receiver as WatchReceiver;

mod blobs_store;
mod jobs;
mod peer;
mod protocol;
mod registry;
mod sync;

pub use blobs_store::{BlobsStore, StoreError};
pub use jobs::{Job, JobDispatcher, JobReceiver};
pub use protocol::{ProtocolError, ALPN};
pub use registry::PeerRegistry;
pub use sync::SyncError;

// Re-export iroh types for convenience
pub use iroh::NodeAddr;

pub use crate::peer::peer::{Peer, PeerBuilder};

/// Serve the peer's protocols until the shutdown signal fires
///
/// Accepts both the replication protocol and the iroh-blobs transfer
/// protocol on the peer's endpoint.
pub async fn spawn(peer: Peer, mut shutdown_rx: WatchReceiver<()>) -> anyhow::Result<()> {
    let inner_blobs = peer.blobs().inner.clone();
    let router = Router::builder(peer.endpoint().clone())
        .accept(iroh_blobs::ALPN, inner_blobs)
        .accept(ALPN, peer)
        .spawn();

    let _ = shutdown_rx.changed().await;

    router.shutdown().await?;
    Ok(())
}
