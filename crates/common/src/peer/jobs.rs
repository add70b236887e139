//! Background job dispatcher for peer operations
//!
//! This module provides a lightweight job queue using flume channels for
//! coordinating background tasks like drive sync, announce fan-out, and
//! other potentially long-running operations.

use anyhow::Result;
use iroh_blobs::Hash;

use crate::crypto::PublicKey;

/// Background jobs that can be dispatched to the peer worker
#[derive(Debug, Clone)]
pub enum Job {
    /// Sync the drive from a remote peer
    ///
    /// Downloads the snapshot chain up to the target head, verifies
    /// provenance, streams missing content blocks, and applies the chain.
    SyncDrive {
        /// The version the remote peer advertised
        target_version: u64,
        /// The head snapshot hash at that version
        target_head: Hash,
        /// The peer to sync from
        peer_id: PublicKey,
    },

    /// Ping a peer to exchange drive status
    ///
    /// The peer responds with its drive version and head; if it is ahead,
    /// a sync job is dispatched automatically.
    PingDrive {
        /// The peer to ping
        peer_id: PublicKey,
    },

    /// Announce our drive head to a peer
    ///
    /// Dispatched per registered receiver after every local commit so
    /// active receivers learn about new versions without waiting for
    /// their next ping.
    AnnounceDrive {
        /// The peer to announce to
        peer_id: PublicKey,
    },
}

/// Job dispatcher that can be cloned and shared across tasks
///
/// This is a lightweight handle that can be cloned freely to send jobs
/// from anywhere in the application.
#[derive(Debug, Clone)]
pub struct JobDispatcher {
    tx: flume::Sender<Job>,
}

impl JobDispatcher {
    /// Create a new job dispatcher and receiver pair
    ///
    /// Returns a tuple of (dispatcher, receiver). The dispatcher can be
    /// cloned and shared, while the receiver should be given to the worker
    /// task.
    pub fn new() -> (Self, JobReceiver) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, JobReceiver { rx })
    }

    /// Dispatch a job to the background worker
    ///
    /// This is non-blocking and will succeed unless the receiver has been
    /// dropped.
    pub fn dispatch(&self, job: Job) -> Result<()> {
        tracing::debug!("dispatching job: {:?}", job);
        self.tx
            .send(job)
            .map_err(|_| anyhow::anyhow!("job receiver has been dropped"))
    }

    /// Dispatch a sync job
    pub fn dispatch_sync(
        &self,
        target_version: u64,
        target_head: Hash,
        peer_id: PublicKey,
    ) -> Result<()> {
        self.dispatch(Job::SyncDrive {
            target_version,
            target_head,
            peer_id,
        })
    }

    /// Dispatch a ping job
    pub fn dispatch_ping(&self, peer_id: PublicKey) -> Result<()> {
        self.dispatch(Job::PingDrive { peer_id })
    }

    /// Dispatch an announce job
    pub fn dispatch_announce(&self, peer_id: PublicKey) -> Result<()> {
        self.dispatch(Job::AnnounceDrive { peer_id })
    }
}

/// Job receiver for the background worker
///
/// This should be used by a dedicated worker task to process jobs.
#[derive(Debug)]
pub struct JobReceiver {
    rx: flume::Receiver<Job>,
}

impl JobReceiver {
    /// Receive the next job (blocking)
    ///
    /// Returns None when all senders have been dropped (graceful shutdown).
    pub fn recv(&self) -> Option<Job> {
        self.rx.recv().ok()
    }

    /// Get an async receiver for use in async contexts
    ///
    /// This allows consuming the queue as a stream with `.next().await`.
    pub fn into_async(self) -> flume::r#async::RecvStream<'static, Job> {
        self.rx.into_stream()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_dispatch_and_receive() {
        let (dispatcher, receiver) = JobDispatcher::new();
        let peer_id = crate::crypto::SecretKey::generate().public();

        dispatcher.dispatch_ping(peer_id).unwrap();
        match receiver.recv() {
            Some(Job::PingDrive { peer_id: got }) => assert_eq!(got, peer_id),
            other => panic!("unexpected job: {other:?}"),
        }
    }

    #[test]
    fn test_dispatch_after_receiver_drop_fails() {
        let (dispatcher, receiver) = JobDispatcher::new();
        drop(receiver);
        assert!(dispatcher
            .dispatch_ping(crate::crypto::SecretKey::generate().public())
            .is_err());
    }
}
