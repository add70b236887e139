use anyhow::Result;
use iroh_blobs::Hash;
use serde::{Deserialize, Serialize};

use crate::crypto::{PublicKey, Topic};
use crate::peer::protocol::bidirectional::BidirectionalHandler;
use crate::peer::protocol::ProtocolError;
use crate::peer::Peer;

use super::Message;

/// Request to exchange drive status with a peer
///
/// Doubles as the authentication handshake: the topic can only be derived
/// from the drive key, so a correct topic proves the initiator was given
/// the share key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ping {
    /// Topic of the drive the initiator is asking about
    pub topic: Topic,
    /// The initiator's current drive version
    pub version: u64,
}

/// The responder's view of the drive
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PingStatus {
    /// The topic does not match the drive served here
    Denied,
    /// The responder's drive state
    Status {
        version: u64,
        /// Head snapshot hash; `None` while the drive is empty
        head: Option<Hash>,
    },
}

/// Response to a ping request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pong {
    pub status: PingStatus,
}

impl Pong {
    pub fn denied() -> Self {
        Self {
            status: PingStatus::Denied,
        }
    }

    pub fn status(version: u64, head: Option<Hash>) -> Self {
        Self {
            status: PingStatus::Status { version, head },
        }
    }
}

/// Ping handler implementing the bidirectional handler pattern
pub struct PingHandler;

impl BidirectionalHandler for PingHandler {
    type Message = Ping;
    type Reply = Pong;

    fn wrap_request(request: Ping) -> Message {
        Message::Ping(request)
    }

    /// Responder side: authenticate the topic, register the peer, report
    /// our drive state
    async fn handle_message(peer: &Peer, sender_node_id: &PublicKey, ping: &Ping) -> Pong {
        if ping.topic != peer.drive().topic() {
            tracing::warn!(
                "denying ping from {}: topic does not match",
                sender_node_id.fmt_short()
            );
            return Pong::denied();
        }

        peer.registry().register(*sender_node_id, ping.version);

        let drive = peer.drive();
        Pong::status(drive.version(), drive.head())
    }

    /// Initiator side: if the responder is ahead, queue a sync from it
    async fn handle_reply(peer: &Peer, recipient_node_id: &PublicKey, pong: &Pong) -> Result<()> {
        match &pong.status {
            PingStatus::Denied => Err(ProtocolError::Authentication.into()),
            PingStatus::Status { version, head } => {
                tracing::debug!(
                    "peer {} is at version {}",
                    recipient_node_id.fmt_short(),
                    version
                );
                peer.registry().register(*recipient_node_id, *version);
                if *version > peer.drive().version() {
                    if let Some(head) = head {
                        peer.jobs().dispatch_sync(*version, *head, *recipient_node_id)?;
                    }
                }
                Ok(())
            }
        }
    }
}
