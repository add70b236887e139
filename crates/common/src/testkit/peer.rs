use std::path::PathBuf;

use anyhow::Result;
use iroh::NodeId;
use tempfile::TempDir;

use crate::crypto::PublicKey;
use crate::drive::{Drive, Entry};
use crate::session::{Session, SessionConfig, SessionEvent};

/// One session under test, with its folders in a temp dir
///
/// A test peer is either a sender (owns the drive, shares its source
/// folder) or a receiver (mirrors someone else's drive into its downloads
/// folder). The temp dir holding the store and folders lives as long as
/// the peer does.
pub struct TestPeer {
    /// The name of this peer (for debugging)
    pub name: String,
    session: Session,
    events: flume::Receiver<SessionEvent>,
    base: TempDir,
}

impl TestPeer {
    /// Start a sender session over an empty source folder
    pub async fn sender(name: impl Into<String>) -> Result<(Self, String)> {
        let name = name.into();
        let base = TempDir::new()?;
        let config = Self::config(&base);
        std::fs::create_dir_all(&config.source_path)?;

        let (session, key_hex) = Session::create(config).await?;
        let events = session.events();

        tracing::info!("[{}] sender started with key {}", name, key_hex);

        Ok((
            Self {
                name,
                session,
                events,
                base,
            },
            key_hex,
        ))
    }

    /// Start a receiver session joined to `key_hex`
    pub async fn receiver(name: impl Into<String>, key_hex: &str) -> Result<Self> {
        let name = name.into();
        let base = TempDir::new()?;
        let config = Self::config(&base);
        std::fs::create_dir_all(&config.downloads_path)?;

        let session = Session::join(key_hex, config).await?;
        let events = session.events();

        tracing::info!("[{}] receiver joined {}", name, key_hex);

        Ok(Self {
            name,
            session,
            events,
            base,
        })
    }

    fn config(base: &TempDir) -> SessionConfig {
        SessionConfig {
            store_path: base.path().join("store"),
            source_path: base.path().join("source"),
            downloads_path: base.path().join("downloads"),
            // loopback only; no relays, no DHT
            socket_address: Some(([127, 0, 0, 1], 0).into()),
            mainline_discovery: false,
        }
    }

    /// Stop the session gracefully
    pub async fn stop(&mut self) {
        tracing::info!("[{}] stopping", self.name);
        self.session.shutdown().await;
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn drive(&self) -> &Drive {
        self.session.drive()
    }

    /// The session's event feed
    pub fn events(&self) -> &flume::Receiver<SessionEvent> {
        &self.events
    }

    /// The peer's node ID on the network
    pub fn id(&self) -> NodeId {
        self.session.peer().id()
    }

    /// The drive's public key
    pub fn drive_key(&self) -> PublicKey {
        *self.session.key()
    }

    // ========================================
    // Sender operations
    // ========================================

    /// Write `bytes` into the source folder, creating parents as needed
    pub fn write_source(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let dest = self.base.path().join("source").join(path);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, bytes)?;
        Ok(())
    }

    /// Share one file from the source folder into the drive
    pub async fn share(&self, path: &str) -> Result<Entry> {
        Ok(self.session.share_file(path).await?)
    }

    // ========================================
    // Receiver operations
    // ========================================

    /// Kick off a status exchange with the drive host right now
    ///
    /// Production receivers rely on discovery plus periodic heartbeats;
    /// tests introduce addresses by hand and poke instead of waiting.
    pub fn sync_now(&self) -> Result<()> {
        self.session.peer().jobs().dispatch_ping(self.drive_key())
    }

    /// Path a mirrored file would land at
    pub fn download_path(&self, path: &str) -> PathBuf {
        self.base.path().join("downloads").join(path)
    }

    /// Read a mirrored file's bytes
    pub fn read_download(&self, path: &str) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.download_path(path))?)
    }

    /// Whether a mirrored file exists locally
    pub fn has_download(&self, path: &str) -> bool {
        self.download_path(path).exists()
    }

    /// The downloads folder root
    pub fn downloads_dir(&self) -> PathBuf {
        self.base.path().join("downloads")
    }
}
