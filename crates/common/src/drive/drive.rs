use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use anyhow::anyhow;
use bytes::Bytes;
use futures::stream;
use iroh_blobs::Hash;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::crypto::{PublicKey, SecretKey, Topic};
use crate::peer::{BlobsStore, StoreError};

use super::entry::{ChangeKind, Entry, EntryChange};
use super::head::{HeadStore, HeadStoreError};
use super::snapshot::{Snapshot, SnapshotError};
use super::watch::DriveWatcher;

#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("default error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("blobs store error: {0}")]
    Store(#[from] StoreError),
    #[error("head store error: {0}")]
    Head(#[from] HeadStoreError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("path not found: {0}")]
    NotFound(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("version {since} is ahead of drive version {current}")]
    InvalidVersion { since: u64, current: u64 },
    #[error("drive is a read-only replica")]
    ReadOnly,
    #[error("snapshot at version {version} does not extend the local chain")]
    Disjoint { version: u64 },
}

/// In-memory drive state, rebuilt from the snapshot chain
#[derive(Debug, Default)]
struct DriveInner {
    /// Live path index
    entries: BTreeMap<String, Entry>,
    /// Applied changes per committed version, for sub-linear diffs
    changes: BTreeMap<u64, Vec<EntryChange>>,
    /// Last change version per path, including removed paths
    path_versions: BTreeMap<String, u64>,
    version: u64,
    head: Option<Hash>,
}

impl DriveInner {
    /// Fold one committed version into the index
    fn apply(&mut self, version: u64, head: Hash, changes: Vec<EntryChange>) {
        let mut applied = Vec::with_capacity(changes.len());
        for change in changes {
            if self.apply_change(&change) {
                applied.push(change);
            }
        }
        self.changes.insert(version, applied);
        self.version = version;
        self.head = Some(head);
    }

    /// Per-path tie-break: a change only lands if it is strictly newer
    /// than the last change recorded for its path
    fn apply_change(&mut self, change: &EntryChange) -> bool {
        if let Some(&seen) = self.path_versions.get(&change.path) {
            if change.version <= seen {
                return false;
            }
        }
        self.path_versions.insert(change.path.clone(), change.version);
        match (&change.kind, &change.entry) {
            (ChangeKind::Removed, _) => {
                self.entries.remove(&change.path);
            }
            (_, Some(entry)) => {
                self.entries.insert(change.path.clone(), entry.clone());
            }
            // a live change with no entry carries nothing to index
            (_, None) => {}
        }
        true
    }
}

/// A versioned path index over the content store
///
/// One writer, any number of replicas. Every mutation commits a signed
/// [`Snapshot`] block and bumps the version by exactly one; replicas apply
/// snapshot batches fetched from the writer and converge on the same
/// index. Handles are cheap to clone and share one state.
#[derive(Clone, Debug)]
pub struct Drive {
    key: PublicKey,
    secret: Option<SecretKey>,
    store: BlobsStore,
    heads: Arc<dyn HeadStore>,
    inner: Arc<RwLock<DriveInner>>,
    /// Serializes commits across await points
    commit_gate: Arc<tokio::sync::Mutex<()>>,
    version_tx: Arc<watch::Sender<u64>>,
}

impl Drive {
    fn new(
        key: PublicKey,
        secret: Option<SecretKey>,
        store: BlobsStore,
        heads: Arc<dyn HeadStore>,
    ) -> Self {
        let (version_tx, _) = watch::channel(0);
        Self {
            key,
            secret,
            store,
            heads,
            inner: Arc::new(RwLock::new(DriveInner::default())),
            commit_gate: Arc::new(tokio::sync::Mutex::new(())),
            version_tx: Arc::new(version_tx),
        }
    }

    /// Open a writable drive owned by `secret`
    ///
    /// Starts empty at version 0 the first time. If the head store already
    /// points into a chain, the chain is replayed from the content store so
    /// a restarted writer resumes where it left off.
    pub async fn open(
        secret: SecretKey,
        store: BlobsStore,
        heads: Arc<dyn HeadStore>,
    ) -> Result<Self, DriveError> {
        let drive = Self::new(secret.public(), Some(secret), store, heads);
        if let Some((head, version)) = drive.heads.load().await? {
            info!(
                "replaying drive {} up to version {}",
                drive.key.fmt_short(),
                version
            );
            drive.replay_head(head).await?;
        }
        Ok(drive)
    }

    /// Open a read-only replica of the drive identified by `key`
    ///
    /// Replicas only mutate through [`Drive::apply_snapshots`].
    pub async fn replica(
        key: PublicKey,
        store: BlobsStore,
        heads: Arc<dyn HeadStore>,
    ) -> Result<Self, DriveError> {
        let drive = Self::new(key, None, store, heads);
        if let Some((head, _)) = drive.heads.load().await? {
            drive.replay_head(head).await?;
        }
        Ok(drive)
    }

    /// The drive's public key, which receivers use to find and verify it
    pub fn key(&self) -> &PublicKey {
        &self.key
    }

    /// The discovery topic derived from the drive key
    pub fn topic(&self) -> Topic {
        Topic::derive(&self.key)
    }

    pub fn store(&self) -> &BlobsStore {
        &self.store
    }

    pub fn is_writer(&self) -> bool {
        self.secret.is_some()
    }

    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    pub fn head(&self) -> Option<Hash> {
        self.inner.read().head
    }

    /// Store `bytes` under `path`, committing one new version
    ///
    /// The returned entry's version equals the new drive version. Re-putting
    /// identical bytes still commits (the path's entry version moves) but
    /// stores no second block.
    pub async fn put_file(&self, path: &str, bytes: Vec<u8>) -> Result<Entry, DriveError> {
        let path = clean_path(path)?;
        let size = bytes.len() as u64;
        let stream = Box::pin(stream::once(async move {
            Ok::<_, std::io::Error>(Bytes::from(bytes))
        }));
        let hash = self.store.put_stream(stream).await?;

        let _gate = self.commit_gate.lock().await;
        let (version, head, exists) = {
            let inner = self.inner.read();
            (inner.version, inner.head, inner.entries.contains_key(&path))
        };
        let next = version + 1;
        let entry = Entry {
            path: path.clone(),
            hash,
            size,
            version: next,
        };
        let change = if exists {
            EntryChange::modified(entry.clone())
        } else {
            EntryChange::added(entry.clone())
        };
        self.commit_locked(next, head, vec![change]).await?;
        Ok(entry)
    }

    /// Remove `path` from the drive, committing one new version
    pub async fn remove_file(&self, path: &str) -> Result<(), DriveError> {
        let path = clean_path(path)?;

        let _gate = self.commit_gate.lock().await;
        let (version, head, exists) = {
            let inner = self.inner.read();
            (inner.version, inner.head, inner.entries.contains_key(&path))
        };
        if !exists {
            return Err(DriveError::NotFound(path));
        }
        let next = version + 1;
        let change = EntryChange::removed(path, next);
        self.commit_locked(next, head, vec![change]).await
    }

    /// Read the full content stored under `path`
    pub async fn get_file(&self, path: &str) -> Result<Bytes, DriveError> {
        let entry = self.entry(path)?;
        let bytes = self.store.get(&entry.hash).await?;
        Ok(bytes)
    }

    /// Metadata for `path`
    pub fn entry(&self, path: &str) -> Result<Entry, DriveError> {
        let path = clean_path(path)?;
        self.inner
            .read()
            .entries
            .get(&path)
            .cloned()
            .ok_or(DriveError::NotFound(path))
    }

    /// All live entries whose path starts with `prefix`, plus the version
    /// the listing was taken at
    ///
    /// The listing is one atomic read of the index; it never observes a
    /// half-applied commit.
    pub fn list(&self, prefix: &str) -> (Vec<Entry>, u64) {
        let inner = self.inner.read();
        let entries = inner
            .entries
            .values()
            .filter(|entry| entry.path.starts_with(prefix))
            .cloned()
            .collect();
        (entries, inner.version)
    }

    /// Every path whose latest change landed after `since`, one change per
    /// path (latest wins), plus the version the diff covers up to
    pub fn diff(&self, since: u64) -> Result<(Vec<EntryChange>, u64), DriveError> {
        let inner = self.inner.read();
        if since > inner.version {
            return Err(DriveError::InvalidVersion {
                since,
                current: inner.version,
            });
        }
        let mut latest: BTreeMap<String, EntryChange> = BTreeMap::new();
        for changes in inner.changes.range(since + 1..).map(|(_, c)| c) {
            for change in changes {
                latest.insert(change.path.clone(), change.clone());
            }
        }
        Ok((latest.into_values().collect(), inner.version))
    }

    /// Subscribe to version transitions
    ///
    /// Events start from the drive's current version; the stream ends when
    /// every handle to this drive has been dropped.
    pub fn watch(&self) -> DriveWatcher {
        let rx = self.version_tx.subscribe();
        let last = *rx.borrow();
        DriveWatcher::new(rx, last)
    }

    /// Apply a batch of snapshots fetched from the writer, oldest first
    ///
    /// Each snapshot is verified against the drive key, must link to the
    /// current head, and advances the version to its own. Snapshots at or
    /// below the current version are skipped, so replaying a batch is a
    /// no-op. Returns the drive version after the batch.
    pub async fn apply_snapshots(&self, snapshots: Vec<Snapshot>) -> Result<u64, DriveError> {
        let _gate = self.commit_gate.lock().await;
        let mut applied = 0usize;
        for snapshot in snapshots {
            snapshot.verify(&self.key)?;
            let (version, head) = {
                let inner = self.inner.read();
                (inner.version, inner.head)
            };
            if snapshot.version <= version {
                debug!(
                    "skipping already applied snapshot at version {}",
                    snapshot.version
                );
                continue;
            }
            if snapshot.previous != head {
                return Err(DriveError::Disjoint {
                    version: snapshot.version,
                });
            }
            let bytes = snapshot.encode()?;
            let hash = self.store.put(bytes).await?;
            let next = snapshot.version;
            {
                let mut inner = self.inner.write();
                inner.apply(next, hash, snapshot.changes);
            }
            applied += 1;
        }

        let (version, head) = {
            let inner = self.inner.read();
            (inner.version, inner.head)
        };
        if applied > 0 {
            if let Some(head) = head {
                self.heads.save(head, version).await?;
            }
            self.version_tx.send_replace(version);
            debug!(
                "drive {} applied {} snapshots, now at version {}",
                self.key.fmt_short(),
                applied,
                version
            );
        }
        Ok(version)
    }

    /// Commit one signed snapshot; the caller must hold the commit gate
    async fn commit_locked(
        &self,
        version: u64,
        previous: Option<Hash>,
        changes: Vec<EntryChange>,
    ) -> Result<(), DriveError> {
        let secret = self.secret.as_ref().ok_or(DriveError::ReadOnly)?;
        let snapshot = Snapshot::create(secret, version, previous, changes)?;
        let hash = self.store.put(snapshot.encode()?).await?;
        {
            let mut inner = self.inner.write();
            inner.apply(version, hash, snapshot.changes);
        }
        self.heads.save(hash, version).await?;
        self.version_tx.send_replace(version);
        debug!(
            "drive {} committed version {}",
            self.key.fmt_short(),
            version
        );
        Ok(())
    }

    /// Rebuild state by walking the chain from `head` back to genesis and
    /// applying forward
    async fn replay_head(&self, head: Hash) -> Result<(), DriveError> {
        let mut snapshots = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = Some(head);
        while let Some(hash) = cursor {
            if !seen.insert(hash) {
                return Err(DriveError::Default(anyhow!(
                    "snapshot chain loops at {hash}"
                )));
            }
            let bytes = self.store.get(&hash).await?;
            let snapshot = Snapshot::decode(&bytes)?;
            snapshot.verify(&self.key)?;
            cursor = snapshot.previous;
            snapshots.push((hash, snapshot));
        }
        snapshots.reverse();

        let version = {
            let mut inner = self.inner.write();
            for (hash, snapshot) in snapshots {
                inner.apply(snapshot.version, hash, snapshot.changes);
            }
            inner.version
        };
        self.version_tx.send_replace(version);
        Ok(())
    }
}

/// Normalize a drive path: `/`-separated, no leading slash, no `.` or
/// empty segments, `..` rejected outright
fn clean_path(path: &str) -> Result<String, DriveError> {
    let mut parts = Vec::new();
    for part in path.trim().split('/') {
        match part {
            "" | "." => continue,
            ".." => return Err(DriveError::InvalidPath(path.to_string())),
            part => parts.push(part),
        }
    }
    if parts.is_empty() {
        return Err(DriveError::InvalidPath(path.to_string()));
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::drive::head::MemoryHeadStore;
    use tempfile::TempDir;

    async fn setup_drive() -> Drive {
        let store = BlobsStore::memory().await.unwrap();
        let heads = Arc::new(MemoryHeadStore::new());
        Drive::open(SecretKey::generate(), store, heads)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let drive = setup_drive().await;

        drive.put_file("docs/a.txt", b"hello".to_vec()).await.unwrap();
        let bytes = drive.get_file("docs/a.txt").await.unwrap();
        assert_eq!(bytes.as_ref(), b"hello");
    }

    #[tokio::test]
    async fn test_versions_increment_by_one() {
        let drive = setup_drive().await;
        assert_eq!(drive.version(), 0);

        for (i, path) in ["a", "b", "c"].iter().enumerate() {
            let entry = drive.put_file(path, b"x".to_vec()).await.unwrap();
            let expected = i as u64 + 1;
            assert_eq!(drive.version(), expected);
            assert_eq!(entry.version, expected);
        }
    }

    #[tokio::test]
    async fn test_overwrite_is_modification() {
        let drive = setup_drive().await;

        drive.put_file("a.txt", b"one".to_vec()).await.unwrap();
        let entry = drive.put_file("a.txt", b"two".to_vec()).await.unwrap();
        assert_eq!(entry.version, 2);

        let (changes, version) = drive.diff(1).unwrap();
        assert_eq!(version, 2);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Modified);
        assert_eq!(drive.get_file("a.txt").await.unwrap().as_ref(), b"two");
    }

    #[tokio::test]
    async fn test_identical_bytes_share_a_block() {
        let drive = setup_drive().await;

        let a = drive.put_file("a.txt", b"same".to_vec()).await.unwrap();
        let b = drive.put_file("b.txt", b"same".to_vec()).await.unwrap();
        assert_eq!(a.hash, b.hash);
        assert_ne!(a.version, b.version);
    }

    #[tokio::test]
    async fn test_remove_file() {
        let drive = setup_drive().await;

        drive.put_file("a.txt", b"x".to_vec()).await.unwrap();
        drive.remove_file("a.txt").await.unwrap();

        assert_eq!(drive.version(), 2);
        assert!(matches!(
            drive.entry("a.txt"),
            Err(DriveError::NotFound(_))
        ));
        assert!(drive.list("").0.is_empty());
    }

    #[tokio::test]
    async fn test_remove_missing_path() {
        let drive = setup_drive().await;
        assert!(matches!(
            drive.remove_file("nope.txt").await,
            Err(DriveError::NotFound(_))
        ));
        // a failed removal commits nothing
        assert_eq!(drive.version(), 0);
    }

    #[tokio::test]
    async fn test_list_prefix() {
        let drive = setup_drive().await;

        drive.put_file("docs/a.txt", b"a".to_vec()).await.unwrap();
        drive.put_file("docs/b.txt", b"b".to_vec()).await.unwrap();
        drive.put_file("img/c.png", b"c".to_vec()).await.unwrap();

        let (docs, _) = drive.list("docs/");
        assert_eq!(docs.len(), 2);
        let (all, version) = drive.list("");
        assert_eq!(all.len(), 3);
        assert_eq!(version, 3);
    }

    #[tokio::test]
    async fn test_diff_latest_wins() {
        let drive = setup_drive().await;

        drive.put_file("a.txt", b"one".to_vec()).await.unwrap();
        drive.put_file("b.txt", b"b".to_vec()).await.unwrap();
        drive.put_file("a.txt", b"two".to_vec()).await.unwrap();

        let (changes, version) = drive.diff(0).unwrap();
        assert_eq!(version, 3);
        // one change per path, and a.txt reports only its latest state
        assert_eq!(changes.len(), 2);
        let a = changes.iter().find(|c| c.path == "a.txt").unwrap();
        assert_eq!(a.version, 3);
        assert_eq!(a.kind, ChangeKind::Modified);
    }

    #[tokio::test]
    async fn test_diff_includes_removals() {
        let drive = setup_drive().await;

        drive.put_file("a.txt", b"x".to_vec()).await.unwrap();
        drive.put_file("b.txt", b"x".to_vec()).await.unwrap();
        drive.remove_file("a.txt").await.unwrap();

        let (changes, _) = drive.diff(2).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Removed);
        assert!(changes[0].entry.is_none());
    }

    #[tokio::test]
    async fn test_diff_at_current_version_is_empty() {
        let drive = setup_drive().await;
        drive.put_file("a.txt", b"x".to_vec()).await.unwrap();

        let (changes, version) = drive.diff(1).unwrap();
        assert!(changes.is_empty());
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn test_diff_ahead_of_drive_is_invalid() {
        let drive = setup_drive().await;
        assert!(matches!(
            drive.diff(5),
            Err(DriveError::InvalidVersion {
                since: 5,
                current: 0
            })
        ));
    }

    #[tokio::test]
    async fn test_diff_from_zero_covers_the_listing() {
        let drive = setup_drive().await;

        drive.put_file("a.txt", b"a".to_vec()).await.unwrap();
        drive.put_file("b.txt", b"b".to_vec()).await.unwrap();
        drive.remove_file("a.txt").await.unwrap();

        let (changes, _) = drive.diff(0).unwrap();
        let live: Vec<_> = changes
            .iter()
            .filter(|c| c.is_live())
            .map(|c| c.entry.clone().unwrap())
            .collect();
        let (listing, _) = drive.list("");
        assert_eq!(live, listing);
    }

    #[tokio::test]
    async fn test_replica_rejects_writes() {
        let secret = SecretKey::generate();
        let store = BlobsStore::memory().await.unwrap();
        let drive = Drive::replica(secret.public(), store, Arc::new(MemoryHeadStore::new()))
            .await
            .unwrap();

        assert!(!drive.is_writer());
        assert!(matches!(
            drive.put_file("a.txt", b"x".to_vec()).await,
            Err(DriveError::ReadOnly)
        ));
        assert!(matches!(
            drive.remove_file("a.txt").await,
            Err(DriveError::ReadOnly)
        ));
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let drive = setup_drive().await;

        for path in ["", "/", ".", "../a.txt", "docs/../../a.txt"] {
            assert!(
                matches!(
                    drive.put_file(path, b"x".to_vec()).await,
                    Err(DriveError::InvalidPath(_))
                ),
                "path {path:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_paths_are_normalized() {
        let drive = setup_drive().await;

        let entry = drive.put_file("/docs//./a.txt", b"x".to_vec()).await.unwrap();
        assert_eq!(entry.path, "docs/a.txt");
        assert!(drive.entry("docs/a.txt").is_ok());
    }

    #[tokio::test]
    async fn test_reopen_replays_history() {
        let temp = TempDir::new().unwrap();
        let blob_path = temp.path().join("blobs");
        let heads = Arc::new(crate::drive::head::FsHeadStore::new(
            temp.path().join("HEAD.json"),
        ));
        let secret = SecretKey::generate();

        {
            let store = BlobsStore::fs(&blob_path).await.unwrap();
            let drive = Drive::open(secret.clone(), store, heads.clone())
                .await
                .unwrap();
            drive.put_file("a.txt", b"one".to_vec()).await.unwrap();
            drive.put_file("b.txt", b"two".to_vec()).await.unwrap();
            drive.remove_file("a.txt").await.unwrap();
        }

        let store = BlobsStore::fs(&blob_path).await.unwrap();
        let drive = Drive::open(secret, store, heads).await.unwrap();
        assert_eq!(drive.version(), 3);
        assert!(matches!(
            drive.entry("a.txt"),
            Err(DriveError::NotFound(_))
        ));
        assert_eq!(drive.get_file("b.txt").await.unwrap().as_ref(), b"two");

        // the resumed chain keeps counting from where it stopped
        let entry = drive.put_file("c.txt", b"three".to_vec()).await.unwrap();
        assert_eq!(entry.version, 4);
    }

    #[tokio::test]
    async fn test_apply_snapshots_replays_chain() {
        let secret = SecretKey::generate();

        // a two-version chain, built the way a writer commits it
        let change_1 = EntryChange::added(Entry {
            path: "a.txt".to_string(),
            hash: Hash::new(b"one"),
            size: 3,
            version: 1,
        });
        let snapshot_1 = Snapshot::create(&secret, 1, None, vec![change_1]).unwrap();
        let hash_1 = Hash::new(snapshot_1.encode().unwrap());

        let change_2 = EntryChange::added(Entry {
            path: "b.txt".to_string(),
            hash: Hash::new(b"two"),
            size: 3,
            version: 2,
        });
        let snapshot_2 = Snapshot::create(&secret, 2, Some(hash_1), vec![change_2]).unwrap();

        let store = BlobsStore::memory().await.unwrap();
        let replica = Drive::replica(secret.public(), store, Arc::new(MemoryHeadStore::new()))
            .await
            .unwrap();

        let batch = vec![snapshot_1, snapshot_2];
        let version = replica.apply_snapshots(batch.clone()).await.unwrap();
        assert_eq!(version, 2);
        assert_eq!(replica.list("").0.len(), 2);

        // replaying the same batch is a no-op
        let version = replica.apply_snapshots(batch).await.unwrap();
        assert_eq!(version, 2);
        assert_eq!(replica.list("").0.len(), 2);
    }

    #[tokio::test]
    async fn test_apply_rejects_disjoint_chain() {
        let secret = SecretKey::generate();
        let store = BlobsStore::memory().await.unwrap();
        let replica = Drive::replica(secret.public(), store, Arc::new(MemoryHeadStore::new()))
            .await
            .unwrap();

        // version 3 linked to a head the replica has never seen
        let change = EntryChange::removed("a.txt".to_string(), 3);
        let snapshot =
            Snapshot::create(&secret, 3, Some(Hash::new(b"elsewhere")), vec![change]).unwrap();

        assert!(matches!(
            replica.apply_snapshots(vec![snapshot]).await,
            Err(DriveError::Disjoint { version: 3 })
        ));
        assert_eq!(replica.version(), 0);
    }

    #[tokio::test]
    async fn test_apply_rejects_foreign_signature() {
        let secret = SecretKey::generate();
        let stranger = SecretKey::generate();
        let store = BlobsStore::memory().await.unwrap();
        let replica = Drive::replica(secret.public(), store, Arc::new(MemoryHeadStore::new()))
            .await
            .unwrap();

        let change = EntryChange::removed("a.txt".to_string(), 1);
        let snapshot = Snapshot::create(&stranger, 1, None, vec![change]).unwrap();

        assert!(matches!(
            replica.apply_snapshots(vec![snapshot]).await,
            Err(DriveError::Snapshot(SnapshotError::WrongDrive { .. }))
        ));
    }

    #[tokio::test]
    async fn test_watch_sees_commits() {
        let drive = setup_drive().await;
        let mut watcher = drive.watch();

        drive.put_file("a.txt", b"x".to_vec()).await.unwrap();
        let event = watcher.next_event().await.unwrap();
        assert_eq!(event.previous, 0);
        assert_eq!(event.current, 1);
    }

    #[tokio::test]
    async fn test_watch_ends_when_drive_drops() {
        let drive = setup_drive().await;
        let mut watcher = drive.watch();
        drop(drive);
        assert!(watcher.next_event().await.is_none());
    }
}
