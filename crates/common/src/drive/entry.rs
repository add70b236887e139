use iroh_blobs::Hash;
use serde::{Deserialize, Serialize};

/// A live file in the drive
///
/// `version` is the drive version at which this path last changed, not a
/// per-file counter. Two entries with the same hash share one stored block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Normalized drive path, `/`-separated with no leading slash
    pub path: String,
    /// Content address of the file bytes
    pub hash: Hash,
    /// Size of the file in bytes
    pub size: u64,
    /// Drive version that committed this state of the path
    pub version: u64,
}

/// What happened to a path in a committed mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One path's change within a committed drive version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryChange {
    pub path: String,
    /// Drive version that committed this change
    pub version: u64,
    pub kind: ChangeKind,
    /// The resulting entry; `None` iff the path was removed
    pub entry: Option<Entry>,
}

impl EntryChange {
    pub fn added(entry: Entry) -> Self {
        Self {
            path: entry.path.clone(),
            version: entry.version,
            kind: ChangeKind::Added,
            entry: Some(entry),
        }
    }

    pub fn modified(entry: Entry) -> Self {
        Self {
            path: entry.path.clone(),
            version: entry.version,
            kind: ChangeKind::Modified,
            entry: Some(entry),
        }
    }

    pub fn removed(path: String, version: u64) -> Self {
        Self {
            path,
            version,
            kind: ChangeKind::Removed,
            entry: None,
        }
    }

    /// Whether this change leaves the path present in the drive
    pub fn is_live(&self) -> bool {
        !matches!(self.kind, ChangeKind::Removed)
    }
}
