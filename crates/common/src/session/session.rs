use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::crypto::{KeyError, PublicKey, SecretKey};
use crate::drive::{Drive, DriveError, Entry, FsHeadStore, MemoryHeadStore};
use crate::mirror::{self, MirrorEngine, MirrorError};
use crate::peer::{self, BlobsStore, Peer, PeerBuilder, StoreError};

use super::events::{EventSender, SessionEvent};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("default error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("session i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid key: {0}")]
    InvalidKey(#[from] KeyError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("drive error: {0}")]
    Drive(#[from] DriveError),
    #[error("mirror error: {0}")]
    Mirror(#[from] MirrorError),
}

/// Where a session keeps its state and which folders it touches
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Blocks, head pointer, and identity key live under here
    pub store_path: PathBuf,
    /// Sender: the folder whose files get shared
    pub source_path: PathBuf,
    /// Receiver: the folder replicated files get written into
    pub downloads_path: PathBuf,
    /// Socket to bind the endpoint on; ephemeral when unset
    pub socket_address: Option<SocketAddr>,
    /// Join the mainline DHT for discovery. Tests turn this off and wire
    /// peers together with explicit addresses.
    pub mainline_discovery: bool,
}

/// One active share, on either side of it
///
/// A session owns the drive, the peer serving it, and the background tasks
/// that keep everything moving: the protocol router, the job worker, and
/// (per role) the announce fan-out or the mirror engine. Dropping a session
/// without calling [`Session::shutdown`] aborts nothing; call shutdown to
/// stop cleanly.
pub struct Session {
    config: SessionConfig,
    drive: Drive,
    peer: Peer,
    events: EventSender,
    events_rx: flume::Receiver<SessionEvent>,
    shutdown_tx: watch::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl Session {
    /// Start sharing the source folder. Returns the session and the hex
    /// share key receivers join with.
    ///
    /// The drive identity is loaded from `identity.pem` under the store
    /// path, or generated and persisted on first use, so the share key
    /// survives restarts. Existing history is replayed from the store and
    /// the source folder is imported on top of it.
    pub async fn create(config: SessionConfig) -> Result<(Session, String), SessionError> {
        let (events, events_rx) = EventSender::new();

        let secret = load_or_create_identity(&config.store_path.join("identity.pem"))?;
        let store = BlobsStore::fs(&config.store_path.join("blobs")).await?;
        let heads = Arc::new(FsHeadStore::new(config.store_path.join("HEAD.json")));

        let drive = Drive::open(secret.clone(), store, heads).await?;
        let key_hex = drive.key().to_hex();

        // the endpoint reuses the drive key, so the share key is also the
        // address receivers dial
        let mut session = Session::start(config, drive, secret, events, events_rx, true).await?;

        if let Err(e) = mirror::import_dir(session.drive(), &session.config.source_path).await {
            session.shutdown().await;
            return Err(e.into());
        }

        session.events.info(format!(
            "sharing {} — give receivers the key {}",
            session.config.source_path.display(),
            key_hex
        ));

        Ok((session, key_hex))
    }

    /// Join someone else's share with their hex key
    ///
    /// The key is validated before anything is opened or dialed, so a
    /// mistyped key fails fast with [`SessionError::InvalidKey`]. On
    /// success the mirror engine starts projecting the drive into the
    /// downloads folder.
    pub async fn join(key_hex: &str, config: SessionConfig) -> Result<Session, SessionError> {
        let key = PublicKey::from_hex(key_hex)?;

        let (events, events_rx) = EventSender::new();

        // receivers use a throwaway identity; the drive key identifies the
        // share, not us
        let secret = SecretKey::generate();
        let store = BlobsStore::fs(&config.store_path.join("blobs")).await?;
        let heads = Arc::new(MemoryHeadStore::new());

        let drive = Drive::replica(key, store, heads).await?;

        let mut session = Session::start(config, drive, secret, events, events_rx, false).await?;

        // first contact; the pong tells us how far behind we are
        if let Err(e) = session.peer.jobs().dispatch_ping(key) {
            session.shutdown().await;
            return Err(SessionError::Default(e));
        }

        session
            .events
            .info(format!("joined drive {}", key.fmt_short()));

        Ok(session)
    }

    /// Build the peer and spawn the background tasks common to both roles,
    /// plus the role-specific one
    async fn start(
        config: SessionConfig,
        drive: Drive,
        secret: SecretKey,
        events: EventSender,
        events_rx: flume::Receiver<SessionEvent>,
        sender: bool,
    ) -> Result<Session, SessionError> {
        let mut builder = PeerBuilder::new()
            .secret_key(secret)
            .drive(drive.clone())
            .events(events.clone())
            .mainline_discovery(config.mainline_discovery);
        if let Some(socket_address) = config.socket_address {
            builder = builder.socket_address(socket_address);
        }
        let mut peer = builder.build().await;

        let job_receiver = peer
            .take_job_receiver()
            .ok_or_else(|| anyhow!("job receiver already taken"))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let mut handles = Vec::new();

        // protocol router
        let router_peer = peer.clone();
        let router_rx = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = peer::spawn(router_peer, router_rx).await {
                tracing::error!("peer router error: {}", e);
            }
        }));

        // background job worker
        let worker_peer = peer.clone();
        let worker_rx = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            worker_peer.run_worker(job_receiver, worker_rx).await;
        }));

        if sender {
            // fan out an announce to registered receivers after every
            // local commit
            let announce_peer = peer.clone();
            let mut watcher = drive.watch();
            let mut announce_rx = shutdown_rx.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        event = watcher.next_event() => {
                            match event {
                                Some(event) => {
                                    tracing::debug!("announcing version {}", event.current);
                                    if let Err(e) = announce_peer.announce_committed() {
                                        tracing::error!("failed to queue announces: {}", e);
                                        break;
                                    }
                                }
                                None => break,
                            }
                        }
                        _ = announce_rx.changed() => break,
                    }
                }
            }));
        } else {
            // project the drive into the downloads folder
            let engine = MirrorEngine::new(drive.clone(), &config.downloads_path, events.clone());
            let mirror_rx = shutdown_rx.clone();
            handles.push(tokio::spawn(async move {
                if let Err(e) = engine.run(mirror_rx).await {
                    tracing::error!("mirror engine error: {}", e);
                }
            }));
        }

        Ok(Session {
            config,
            drive,
            peer,
            events,
            events_rx,
            shutdown_tx,
            handles,
        })
    }

    /// Share one file from the source folder on user action. Fails with a
    /// read-only drive error on the receiver side.
    pub async fn share_file(&self, path: impl AsRef<Path>) -> Result<Entry, SessionError> {
        let entry = mirror::import_file(&self.drive, &self.config.source_path, path.as_ref()).await?;
        Ok(entry)
    }

    /// Receiver half of the session event channel
    ///
    /// Status lines and peer counts arrive here; nothing is ever printed
    /// by the session itself.
    pub fn events(&self) -> flume::Receiver<SessionEvent> {
        self.events_rx.clone()
    }

    pub fn drive(&self) -> &Drive {
        &self.drive
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// The drive's public key; its hex rendering is the share key
    pub fn key(&self) -> &PublicKey {
        self.drive.key()
    }

    pub fn is_sender(&self) -> bool {
        self.drive.is_writer()
    }

    /// Stop every background task and wait for them to finish
    ///
    /// Idempotent: calling it again (or on a session that failed half way
    /// through startup) does nothing.
    pub async fn shutdown(&mut self) {
        let handles = std::mem::take(&mut self.handles);
        if handles.is_empty() {
            return;
        }

        tracing::info!(
            "shutting down session for drive {}",
            self.drive.key().fmt_short()
        );
        let _ = self.shutdown_tx.send(());

        if timeout(SHUTDOWN_TIMEOUT, join_all(handles)).await.is_err() {
            tracing::error!(
                "session tasks failed to stop within {} seconds",
                SHUTDOWN_TIMEOUT.as_secs()
            );
        }
    }
}

/// Read the identity key at `path`, creating and persisting a fresh one
/// the first time
fn load_or_create_identity(path: &Path) -> Result<SecretKey, SessionError> {
    match std::fs::read_to_string(path) {
        Ok(pem) => Ok(SecretKey::from_pem(&pem)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let secret = SecretKey::generate();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, secret.to_pem())?;
            tracing::info!("created new identity at {}", path.display());
            Ok(secret)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::TempDir;

    fn config(base: &TempDir) -> SessionConfig {
        SessionConfig {
            store_path: base.path().join("store"),
            source_path: base.path().join("source"),
            downloads_path: base.path().join("downloads"),
            socket_address: None,
            mainline_discovery: false,
        }
    }

    #[test]
    fn test_identity_round_trips_through_disk() {
        let base = TempDir::new().unwrap();
        let path = base.path().join("store/identity.pem");

        let first = load_or_create_identity(&path).unwrap();
        let second = load_or_create_identity(&path).unwrap();
        assert_eq!(first.public(), second.public());
    }

    #[test]
    fn test_corrupt_identity_is_an_error() {
        let base = TempDir::new().unwrap();
        let path = base.path().join("identity.pem");
        std::fs::write(&path, "not a pem at all").unwrap();

        assert!(matches!(
            load_or_create_identity(&path),
            Err(SessionError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_join_rejects_malformed_key_before_binding_anything() {
        let base = TempDir::new().unwrap();

        for bad in ["", "zz", "0x1234", &"a".repeat(63), &"g".repeat(64)] {
            let result = Session::join(bad, config(&base)).await;
            assert!(matches!(result, Err(SessionError::InvalidKey(_))));
        }

        // nothing was created on disk either
        assert!(!base.path().join("store").exists());
    }

    #[tokio::test]
    async fn test_create_share_and_shutdown() {
        let base = TempDir::new().unwrap();
        let config = config(&base);
        std::fs::create_dir_all(&config.source_path).unwrap();
        std::fs::write(config.source_path.join("hello.txt"), b"hi").unwrap();

        let (mut session, key_hex) = Session::create(config).await.unwrap();
        assert_eq!(key_hex.len(), 64);
        assert!(session.is_sender());
        assert_eq!(session.key().to_hex(), key_hex);

        // the import of the source folder landed in the drive
        assert_eq!(session.drive().version(), 1);
        assert_eq!(
            session.drive().get_file("hello.txt").await.unwrap().as_ref(),
            b"hi"
        );

        let entry = session.share_file("hello.txt").await.unwrap();
        assert_eq!(entry.version, 2);

        session.shutdown().await;
        session.shutdown().await; // idempotent
    }

    #[tokio::test]
    async fn test_restarted_sender_keeps_key_and_history() {
        let base = TempDir::new().unwrap();
        let config = config(&base);
        std::fs::create_dir_all(&config.source_path).unwrap();
        std::fs::write(config.source_path.join("a.txt"), b"one").unwrap();

        let (mut first, key_a) = Session::create(config.clone()).await.unwrap();
        let version_a = first.drive().version();
        first.shutdown().await;
        drop(first);

        let (mut second, key_b) = Session::create(config).await.unwrap();
        assert_eq!(key_a, key_b);
        // history replayed from disk; the unchanged source import is a no-op
        assert_eq!(second.drive().version(), version_a);
        assert_eq!(
            second.drive().get_file("a.txt").await.unwrap().as_ref(),
            b"one"
        );
        second.shutdown().await;
    }
}
