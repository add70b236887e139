//! Drive synchronization logic
//!
//! This module contains the logic for pulling a drive up to a newer version
//! advertised by a remote peer: walk the snapshot chain backwards from the
//! advertised head to our own head, fetch the file blocks those snapshots
//! reference, then apply the snapshots to the local drive.

use std::collections::HashSet;

use futures::{stream, StreamExt, TryStreamExt};
use iroh_blobs::Hash;

use crate::crypto::PublicKey;
use crate::drive::{DriveError, Snapshot, SnapshotError};

use super::blobs_store::StoreError;
use super::peer::Peer;

/// How many file blocks to fetch concurrently during a sync
const BLOCK_WINDOW: usize = 8;

/// Errors that can occur while syncing a drive from a remote peer
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("default error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("drive error: {0}")]
    Drive(#[from] DriveError),
    #[error("snapshot failed verification: {0}")]
    Provenance(#[from] SnapshotError),
    #[error("snapshot chain loops at {0}")]
    ChainLoop(Hash),
}

/// Pull the local drive up to the given head advertised by a remote peer
///
/// Downloads only the snapshots between our head and the target head, plus
/// the file blocks they reference, so a replica that is one version behind
/// transfers one version's worth of data. Every snapshot is verified against
/// the drive key before anything is applied.
///
/// Returns the drive version after the sync.
pub async fn sync_drive(
    peer: &Peer,
    target_version: u64,
    target_head: Hash,
    peer_id: PublicKey,
) -> Result<u64, SyncError> {
    let drive = peer.drive();

    if drive.head() == Some(target_head) {
        tracing::debug!(
            "drive {} already at head {}, nothing to sync",
            drive.key().fmt_short(),
            target_head
        );
        return Ok(drive.version());
    }

    tracing::info!(
        "syncing drive {} to version {} from peer {}",
        drive.key().fmt_short(),
        target_version,
        peer_id.fmt_short()
    );

    // The advertising peer is preferred, any other known peer is a fallback
    let mut sources = vec![peer_id];
    for known in peer.registry().peers() {
        if known != peer_id {
            sources.push(known);
        }
    }

    let snapshots = download_snapshot_chain(peer, target_head, drive.head(), &sources).await?;
    if snapshots.is_empty() {
        tracing::debug!("no new snapshots, already up to date");
        return Ok(drive.version());
    }

    download_blocks(peer, &snapshots, &sources).await?;

    let version = drive.apply_snapshots(snapshots).await?;

    tracing::info!(
        "drive {} synced to version {}",
        drive.key().fmt_short(),
        version
    );

    Ok(version)
}

/// Download a chain of snapshots from peers
///
/// Walks backwards through the chain via `previous` hashes. Stops before
/// downloading `stop_at` (our current head) or at genesis, whichever comes
/// first, so only the missing suffix of the chain is transferred.
///
/// Returns snapshots ordered oldest to newest, verified against the drive
/// key.
async fn download_snapshot_chain(
    peer: &Peer,
    head: Hash,
    stop_at: Option<Hash>,
    sources: &[PublicKey],
) -> Result<Vec<Snapshot>, SyncError> {
    let drive = peer.drive();
    let store = peer.blobs();

    let mut snapshots = Vec::new();
    let mut visited = HashSet::new();
    let mut current = head;

    loop {
        if stop_at == Some(current) {
            tracing::debug!("reached local head {}, stopping chain walk", current);
            break;
        }
        if !visited.insert(current) {
            return Err(SyncError::ChainLoop(current));
        }

        store
            .download(current, sources.to_vec(), peer.endpoint())
            .await?;

        let bytes = store.get(&current).await?;
        let snapshot = Snapshot::decode(&bytes)?;
        snapshot.verify(drive.key())?;

        let previous = snapshot.previous;
        snapshots.push(snapshot);

        match previous {
            Some(hash) => current = hash,
            None => {
                tracing::debug!("reached genesis snapshot, stopping chain walk");
                break;
            }
        }
    }

    snapshots.reverse();

    tracing::debug!("downloaded {} snapshots", snapshots.len());
    Ok(snapshots)
}

/// Fetch the file blocks referenced by a batch of snapshots
///
/// Blocks already present locally are skipped, so unchanged files cost
/// nothing. Fetches run a few at a time rather than strictly one by one.
async fn download_blocks(
    peer: &Peer,
    snapshots: &[Snapshot],
    sources: &[PublicKey],
) -> Result<(), SyncError> {
    let store = peer.blobs();

    let mut seen = HashSet::new();
    let mut wanted = Vec::new();
    for snapshot in snapshots {
        for change in &snapshot.changes {
            if let Some(entry) = &change.entry {
                if seen.insert(entry.hash) && !store.stat(&entry.hash).await? {
                    wanted.push(entry.hash);
                }
            }
        }
    }

    if wanted.is_empty() {
        return Ok(());
    }

    tracing::debug!("fetching {} file blocks", wanted.len());

    stream::iter(wanted)
        .map(|hash| {
            let store = store.clone();
            let endpoint = peer.endpoint().clone();
            let sources = sources.to_vec();
            async move { store.download(hash, sources, &endpoint).await }
        })
        .buffered(BLOCK_WINDOW)
        .try_collect::<Vec<_>>()
        .await?;

    Ok(())
}
