//! Versioned drive: a single-writer path index over the content store
//!
//! This module defines the core types for skiff's replicated folder:
//!
//! - **[`Entry`]**: one live file — path, content hash, size, version
//! - **[`EntryChange`]**: what happened to a path at one version
//! - **[`Snapshot`]**: a signed, hash-linked commit block
//! - **[`Drive`]**: the in-memory index plus commit and replay logic
//! - **[`HeadStore`]**: durable pointer to the newest snapshot
//! - **[`DriveWatcher`]**: coalescing subscription to version changes
//!
//! # Architecture
//!
//! ## The snapshot chain
//!
//! Every mutation commits one [`Snapshot`] block into the content store.
//! Snapshots link to their predecessor by hash, so the chain from the head
//! back to genesis is the drive's entire history:
//!
//! ```text
//! HEAD -> Snapshot v3 --previous--> Snapshot v2 --previous--> Snapshot v1
//!            |                         |                         |
//!         changes                   changes                   changes
//! ```
//!
//! Replaying the chain oldest-first rebuilds the exact path index, which
//! is how both a restarted writer and a fresh replica come up to date.
//!
//! ## Versioning
//!
//! The drive version starts at 0 and moves by exactly one per local
//! commit. An entry records the version that last changed it, which gives
//! replicas a per-path tie-break and gives [`Drive::diff`] a change index
//! to answer "what happened since version N" without scanning every entry.
//!
//! ## Provenance
//!
//! Snapshots are signed with the drive secret key. Replicas hold only the
//! public key and verify every snapshot before applying it, so a peer that
//! knows the share key can replicate the drive but never extend it.

mod drive;
mod entry;
mod head;
mod snapshot;
mod watch;

pub use drive::{Drive, DriveError};
pub use entry::{ChangeKind, Entry, EntryChange};
pub use head::{FsHeadStore, HeadStore, HeadStoreError, MemoryHeadStore};
pub use snapshot::{Snapshot, SnapshotError};
pub use watch::{DriveWatcher, VersionEvent};
