use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use anyhow::Result;
use iroh::discovery::pkarr::dht::DhtDiscovery;
use iroh::{Endpoint, NodeId};
use tokio::sync::watch::Receiver as WatchReceiver;

use crate::crypto::{PublicKey, SecretKey};
use crate::drive::Drive;
use crate::session::EventSender;

pub use super::blobs_store::BlobsStore;

use super::jobs::{Job, JobDispatcher, JobReceiver};
use super::protocol::bidirectional::BidirectionalHandler;
use super::protocol::{Announce, AnnounceHandler, Ping, PingHandler, ProtocolError};
use super::registry::PeerRegistry;
use super::sync;

pub struct PeerBuilder {
    /// the socket addr to expose the peer on
    ///  if not set, an ephemeral port will be used
    socket_address: Option<SocketAddr>,
    /// the identity of the peer, as a SecretKey
    secret_key: Option<SecretKey>,
    /// the drive this peer serves and replicates
    drive: Option<Drive>,
    /// where status events get reported
    events: Option<EventSender>,
    /// whether to join the mainline DHT for discovery
    mainline_discovery: bool,
}

impl Default for PeerBuilder {
    fn default() -> Self {
        PeerBuilder {
            socket_address: None,
            secret_key: None,
            drive: None,
            events: None,
            mainline_discovery: true,
        }
    }
}

impl PeerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn socket_address(mut self, socket_addr: SocketAddr) -> Self {
        self.socket_address = Some(socket_addr);
        self
    }

    pub fn secret_key(mut self, secret_key: SecretKey) -> Self {
        self.secret_key = Some(secret_key);
        self
    }

    pub fn drive(mut self, drive: Drive) -> Self {
        self.drive = Some(drive);
        self
    }

    pub fn events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Disable mainline discovery. Tests wire peers together with explicit
    /// node addresses instead.
    pub fn mainline_discovery(mut self, enabled: bool) -> Self {
        self.mainline_discovery = enabled;
        self
    }

    pub async fn build(self) -> Peer {
        // set the socket port to unspecified if not set
        let socket_addr = self
            .socket_address
            .unwrap_or_else(|| SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0));
        // generate a new secret key if not set
        let secret_key = self.secret_key.unwrap_or_else(SecretKey::generate);

        // the drive must be set, there is nothing to serve without one
        let drive = self.drive.expect("drive is required");

        // events with nobody listening just get dropped
        let events = self.events.unwrap_or_else(|| EventSender::new().0);

        // Convert the SocketAddr to a SocketAddrV4
        let addr = SocketAddrV4::new(
            socket_addr
                .ip()
                .to_string()
                .parse::<Ipv4Addr>()
                .expect("failed to parse IP address"),
            socket_addr.port(),
        );

        // Create the endpoint with our key and discovery
        let mut builder = Endpoint::builder().secret_key(secret_key.0.clone());
        if self.mainline_discovery {
            let mainline_discovery = DhtDiscovery::builder()
                .secret_key(secret_key.0.clone())
                .build()
                .expect("failed to build mainline discovery");
            builder = builder.discovery(mainline_discovery);
        }
        let endpoint = builder
            .bind_addr_v4(addr)
            .bind()
            .await
            .expect("failed to bind ephemeral endpoint");

        // Create the job dispatcher and receiver
        let (jobs, job_receiver) = JobDispatcher::new();

        let registry = PeerRegistry::new(events.clone());

        Peer {
            drive,
            socket_address: socket_addr,
            secret_key,
            endpoint,
            jobs,
            job_receiver: Some(job_receiver),
            registry,
            events,
        }
    }
}

/// Overview of a peer's state. Provides everything that a peer needs in
/// order to serve its drive, interact with peers, and keep replicas fresh.
#[derive(Debug)]
pub struct Peer {
    drive: Drive,
    socket_address: SocketAddr,
    secret_key: SecretKey,
    endpoint: Endpoint,
    jobs: JobDispatcher,
    job_receiver: Option<JobReceiver>,
    registry: PeerRegistry,
    events: EventSender,
}

impl Clone for Peer {
    fn clone(&self) -> Self {
        Self {
            drive: self.drive.clone(),
            socket_address: self.socket_address,
            secret_key: self.secret_key.clone(),
            endpoint: self.endpoint.clone(),
            jobs: self.jobs.clone(),
            // JobReceiver cannot be cloned - only the original peer can spawn worker
            job_receiver: None,
            registry: self.registry.clone(),
            events: self.events.clone(),
        }
    }
}

impl Peer {
    pub fn drive(&self) -> &Drive {
        &self.drive
    }

    pub fn blobs(&self) -> &BlobsStore {
        self.drive.store()
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn secret(&self) -> &SecretKey {
        &self.secret_key
    }

    pub fn socket(&self) -> &SocketAddr {
        &self.socket_address
    }

    pub fn id(&self) -> NodeId {
        self.endpoint.node_id()
    }

    pub fn jobs(&self) -> &JobDispatcher {
        &self.jobs
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn events(&self) -> &EventSender {
        &self.events
    }

    /// The drive host's key, if we replicate someone else's drive
    ///
    /// Replicas heartbeat the host; the host itself has no origin and
    /// heartbeats its registered replicas instead.
    pub fn origin(&self) -> Option<PublicKey> {
        if self.drive.is_writer() {
            None
        } else {
            Some(*self.drive.key())
        }
    }

    /// Extract the job receiver (used when spawning the worker)
    ///
    /// This can only be called once. Subsequent calls, and calls on a
    /// clone, will return None.
    pub(crate) fn take_job_receiver(&mut self) -> Option<JobReceiver> {
        self.job_receiver.take()
    }

    /// Queue an announce to every registered peer
    ///
    /// Called after a local commit so replicas hear about the new version
    /// without waiting for their next heartbeat.
    pub fn announce_committed(&self) -> Result<()> {
        for peer_id in self.registry.peers() {
            self.jobs.dispatch_announce(peer_id)?;
        }
        Ok(())
    }

    /// Run the background job worker until shutdown
    ///
    /// Processes queued jobs one at a time and schedules periodic
    /// heartbeats. Exits when the shutdown signal fires or every job
    /// sender is gone.
    pub async fn run_worker(self, job_receiver: JobReceiver, mut shutdown_rx: WatchReceiver<()>) {
        use futures::StreamExt;
        use tokio::time::{interval, Duration};

        // Convert to async stream for efficient async processing
        let mut stream = job_receiver.into_async();

        // Interval timer for periodic heartbeats
        let mut ping_interval = interval(Duration::from_secs(30));
        ping_interval.tick().await; // Skip first immediate tick

        loop {
            tokio::select! {
                // Process incoming jobs from the queue
                Some(job) = stream.next() => {
                    match job {
                        Job::SyncDrive { target_version, target_head, peer_id } => {
                            let before = self.drive.version();
                            match sync::sync_drive(&self, target_version, target_head, peer_id).await {
                                Ok(version) => {
                                    if version > before {
                                        self.events.success(format!("synced to version {version}"));
                                    }
                                }
                                Err(e) => {
                                    tracing::error!(
                                        "sync from peer {} failed: {}",
                                        peer_id.fmt_short(),
                                        e
                                    );
                                    self.events.error(format!("sync failed: {e}"));
                                }
                            }
                        }
                        Job::PingDrive { peer_id } => {
                            self.handle_ping_drive(peer_id).await;
                        }
                        Job::AnnounceDrive { peer_id } => {
                            self.handle_announce_drive(peer_id).await;
                        }
                    }
                }

                // Periodic heartbeat scheduler
                _ = ping_interval.tick() => {
                    self.schedule_periodic_pings();
                }

                _ = shutdown_rx.changed() => {
                    tracing::info!("worker received shutdown signal");
                    break;
                }

                // Stream closed (all senders dropped)
                else => {
                    tracing::info!("job queue closed, shutting down worker");
                    break;
                }
            }
        }

        tracing::info!("background job worker shutting down for peer {}", self.id());
    }

    /// Queue heartbeats for this tick
    ///
    /// A replica pings the drive host; the host pings every registered
    /// replica so dead ones get noticed and dropped.
    fn schedule_periodic_pings(&self) {
        match self.origin() {
            Some(origin) => {
                if let Err(e) = self.jobs.dispatch_ping(origin) {
                    tracing::error!("failed to dispatch heartbeat: {}", e);
                }
            }
            None => {
                for peer_id in self.registry.peers() {
                    if let Err(e) = self.jobs.dispatch_ping(peer_id) {
                        tracing::error!("failed to dispatch heartbeat: {}", e);
                    }
                }
            }
        }
    }

    /// Ping a peer and exchange drive status
    ///
    /// A failed exchange drops the peer from the registry. When the
    /// unreachable peer is the drive host, the failure is also surfaced
    /// as a status event, since a replica without its host goes stale.
    async fn handle_ping_drive(&self, peer_id: PublicKey) {
        let ping = Ping {
            topic: self.drive.topic(),
            version: self.drive.version(),
        };

        tracing::debug!("pinging peer {}", peer_id.fmt_short());
        match PingHandler::send(self, &peer_id, ping).await {
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("failed to ping peer {}: {}", peer_id.fmt_short(), e);
                if self.origin() == Some(peer_id) {
                    let message = match e.downcast_ref::<ProtocolError>() {
                        Some(ProtocolError::Authentication) => {
                            "drive host rejected the share key".to_string()
                        }
                        _ => format!("cannot reach drive host: {e}"),
                    };
                    self.events.error(message);
                }
                self.registry.deregister(&peer_id);
            }
        }
    }

    /// Announce our drive head to a peer
    ///
    /// Skipped while the drive is empty. A failed announce drops the peer
    /// from the registry; it can re-register on its next heartbeat.
    async fn handle_announce_drive(&self, peer_id: PublicKey) {
        let Some(head) = self.drive.head() else {
            tracing::debug!("drive has no head yet, skipping announce");
            return;
        };

        let announce = Announce {
            topic: self.drive.topic(),
            version: self.drive.version(),
            head,
        };

        match AnnounceHandler::send(self, &peer_id, announce).await {
            Ok(_) => {
                tracing::debug!(
                    "announced version {} to peer {}",
                    self.drive.version(),
                    peer_id.fmt_short()
                );
            }
            Err(e) => {
                tracing::debug!("failed to announce to peer {}: {}", peer_id.fmt_short(), e);
                self.registry.deregister(&peer_id);
            }
        }
    }
}
