use std::collections::BTreeSet;
use std::path::PathBuf;

use tempfile::NamedTempFile;
use tokio::sync::watch::Receiver as WatchReceiver;

use crate::drive::{Drive, DriveError, Entry, EntryChange};
use crate::session::EventSender;

/// Errors raised while projecting a drive onto the filesystem
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("default error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("mirror i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("drive error: {0}")]
    Drive(#[from] DriveError),
    #[error("store error: {0}")]
    Store(#[from] crate::peer::StoreError),
    #[error("path {0} escapes the local root")]
    EscapingPath(String),
}

/// Keeps a local directory consistent with a drive
///
/// The engine holds a cursor at the last drive version it has projected.
/// On every version event it diffs the drive against the cursor and
/// applies only what changed. A file that fails to write is reported,
/// remembered, and retried at the next event; it never blocks the rest of
/// its batch and never stops the engine.
pub struct MirrorEngine {
    drive: Drive,
    target: PathBuf,
    events: EventSender,
    cursor: u64,
    retry: BTreeSet<String>,
}

impl MirrorEngine {
    pub fn new(drive: Drive, target: impl Into<PathBuf>, events: EventSender) -> Self {
        Self {
            drive,
            target: target.into(),
            events,
            cursor: 0,
            retry: BTreeSet::new(),
        }
    }

    /// The last drive version this engine has projected
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Mirror until shutdown
    ///
    /// Writes the current drive contents into the target directory, then
    /// follows the version feed. Returns when the shutdown signal fires or
    /// when the drive is gone.
    pub async fn run(mut self, mut shutdown_rx: WatchReceiver<()>) -> Result<(), MirrorError> {
        // subscribe before the initial listing so a commit landing in
        // between is not missed
        let mut watcher = self.drive.watch();

        self.initial_mirror().await?;

        loop {
            tokio::select! {
                event = watcher.next_event() => {
                    match event {
                        Some(_) => self.catch_up().await?,
                        None => {
                            tracing::info!("drive closed, stopping mirror");
                            break;
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    tracing::info!("mirror received shutdown signal");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Write every live entry into the target directory
    async fn initial_mirror(&mut self) -> Result<(), MirrorError> {
        let (entries, version) = self.drive.list("");

        let total = entries.len();
        for entry in &entries {
            if let Err(e) = self.write_entry(entry).await {
                self.report_failure(&entry.path, e);
            }
        }
        self.cursor = version;

        if total > 0 {
            tracing::info!(
                "mirrored {} files into {} at version {}",
                total,
                self.target.display(),
                version
            );
            self.events
                .info(format!("mirrored {} files at version {}", total, version));
        }

        Ok(())
    }

    /// Apply everything that changed since the cursor
    async fn catch_up(&mut self) -> Result<(), MirrorError> {
        let (changes, version) = self.drive.diff(self.cursor)?;

        // paths that failed last time come first; a fresh change to the
        // same path supersedes the stale retry
        let retries = std::mem::take(&mut self.retry);
        for path in retries {
            if changes.iter().any(|change| change.path == path) {
                continue;
            }
            self.apply_path(&path).await;
        }

        for change in &changes {
            self.apply_change(change).await;
        }

        tracing::debug!(
            "mirror advanced from version {} to {} ({} changes)",
            self.cursor,
            version,
            changes.len()
        );
        self.cursor = version;

        Ok(())
    }

    /// Apply one diffed change, isolating its failure
    async fn apply_change(&mut self, change: &EntryChange) {
        let result = match &change.entry {
            Some(entry) => self.write_entry(entry).await,
            None => self.remove_path(&change.path).await,
        };
        if let Err(e) = result {
            self.report_failure(&change.path, e);
        }
    }

    /// Re-apply a previously failed path from the drive's current state
    async fn apply_path(&mut self, path: &str) {
        let result = match self.drive.entry(path) {
            Ok(entry) => self.write_entry(&entry).await,
            Err(DriveError::NotFound(_)) => self.remove_path(path).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            self.report_failure(path, e);
        }
    }

    /// Write one entry's bytes to its local path
    async fn write_entry(&self, entry: &Entry) -> Result<(), MirrorError> {
        let bytes = self.drive.store().get(&entry.hash).await?;

        let dest = self.local_path(&entry.path)?;
        let parent = dest.parent().unwrap_or(&self.target).to_path_buf();
        tokio::fs::create_dir_all(&parent).await?;

        // temp file in the destination directory so the rename never
        // crosses a filesystem; a crash leaves at worst a stray temp file
        let temp = NamedTempFile::new_in(&parent)?;
        std::fs::write(temp.path(), &bytes)?;
        temp.persist(&dest).map_err(|e| e.error)?;

        tracing::debug!("mirrored {} ({} bytes)", entry.path, entry.size);
        Ok(())
    }

    /// Delete one entry's local file. A file already gone is fine.
    async fn remove_path(&self, path: &str) -> Result<(), MirrorError> {
        let dest = self.local_path(path)?;
        match tokio::fs::remove_file(&dest).await {
            Ok(()) => {
                tracing::debug!("removed {}", path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve a drive path under the target directory
    ///
    /// Drive paths are normalized at commit time, but nothing from the
    /// network gets to pick a path outside the target directory.
    fn local_path(&self, path: &str) -> Result<PathBuf, MirrorError> {
        let mut dest = self.target.clone();
        for part in path.split('/') {
            if part.is_empty() || part == "." || part == ".." {
                return Err(MirrorError::EscapingPath(path.to_string()));
            }
            dest.push(part);
        }
        if dest == self.target {
            return Err(MirrorError::EscapingPath(path.to_string()));
        }
        Ok(dest)
    }

    fn report_failure(&mut self, path: &str, error: MirrorError) {
        tracing::warn!("failed to mirror {}: {}", path, error);
        self.events.error(format!("failed to mirror {path}: {error}"));
        self.retry.insert(path.to_string());
    }
}
