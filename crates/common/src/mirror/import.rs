use std::path::{Component, Path, PathBuf};

use crate::drive::{Drive, Entry};

use super::MirrorError;

/// Share every regular file under `root` into the drive
///
/// Walks the tree recursively; directories appear implicitly through
/// their files' paths. Symlinks and special files are skipped.
pub async fn import_dir(drive: &Drive, root: &Path) -> Result<Vec<Entry>, MirrorError> {
    let mut entries = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut read_dir = tokio::fs::read_dir(&dir).await?;
        while let Some(item) = read_dir.next_entry().await? {
            let file_type = item.file_type().await?;
            if file_type.is_dir() {
                pending.push(item.path());
            } else if file_type.is_file() {
                entries.push(import_file(drive, root, &item.path()).await?);
            }
        }
    }

    tracing::info!(
        "imported {} files from {} into drive {}",
        entries.len(),
        root.display(),
        drive.key().fmt_short()
    );

    Ok(entries)
}

/// Share one local file into the drive
///
/// The drive path is the file's path relative to `root`; a relative
/// `path` is resolved against `root` first. Files outside the root cannot
/// be shared.
pub async fn import_file(drive: &Drive, root: &Path, path: &Path) -> Result<Entry, MirrorError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    };
    let relative = absolute
        .strip_prefix(root)
        .map_err(|_| MirrorError::EscapingPath(path.display().to_string()))?;

    let drive_path = drive_path(relative)?;
    let bytes = tokio::fs::read(&absolute).await?;

    // unchanged content is a no-op, so re-sharing a folder after a restart
    // does not grow the version history
    let hash = iroh_blobs::Hash::new(&bytes);
    if let Ok(existing) = drive.entry(&drive_path) {
        if existing.hash == hash {
            tracing::debug!("{} unchanged, skipping import", drive_path);
            return Ok(existing);
        }
    }

    let entry = drive.put_file(&drive_path, bytes).await?;

    tracing::info!("shared {} at version {}", entry.path, entry.version);
    Ok(entry)
}

/// Turn a relative filesystem path into a normalized drive path
fn drive_path(relative: &Path) -> Result<String, MirrorError> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| {
                    MirrorError::EscapingPath(relative.display().to_string())
                })?;
                parts.push(part);
            }
            Component::CurDir => {}
            _ => return Err(MirrorError::EscapingPath(relative.display().to_string())),
        }
    }
    if parts.is_empty() {
        return Err(MirrorError::EscapingPath(relative.display().to_string()));
    }
    Ok(parts.join("/"))
}
