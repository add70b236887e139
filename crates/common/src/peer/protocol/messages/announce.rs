use anyhow::Result;
use iroh_blobs::Hash;
use serde::{Deserialize, Serialize};

use crate::crypto::{PublicKey, Topic};
use crate::peer::protocol::bidirectional::BidirectionalHandler;
use crate::peer::protocol::ProtocolError;
use crate::peer::Peer;

use super::Message;

/// Announcement of a new drive head
///
/// The writer sends this to every registered receiver after a commit, so
/// receivers pick up new versions without waiting for their next ping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Announce {
    /// Topic of the drive being announced
    pub topic: Topic,
    /// The announcer's drive version
    pub version: u64,
    /// Head snapshot hash at that version
    pub head: Hash,
}

/// Acknowledgement of an announce
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    pub accepted: bool,
}

/// Announce handler implementing the bidirectional handler pattern
pub struct AnnounceHandler;

impl BidirectionalHandler for AnnounceHandler {
    type Message = Announce;
    type Reply = Ack;

    fn wrap_request(request: Announce) -> Message {
        Message::Announce(request)
    }

    /// Responder side: authenticate the topic and acknowledge
    async fn handle_message(peer: &Peer, sender_node_id: &PublicKey, announce: &Announce) -> Ack {
        if announce.topic != peer.drive().topic() {
            tracing::warn!(
                "rejecting announce from {}: topic does not match",
                sender_node_id.fmt_short()
            );
            return Ack { accepted: false };
        }

        peer.registry().register(*sender_node_id, announce.version);
        Ack { accepted: true }
    }

    /// Responder side, after the ack is sent: queue the sync the announce
    /// was telling us about
    async fn handle_message_side_effect(
        peer: &Peer,
        sender_node_id: &PublicKey,
        announce: &Announce,
        ack: &Ack,
    ) -> Result<()> {
        if ack.accepted && announce.version > peer.drive().version() {
            peer.jobs()
                .dispatch_sync(announce.version, announce.head, *sender_node_id)?;
        }
        Ok(())
    }

    /// Initiator side: a rejected announce means the peer no longer serves
    /// this drive
    async fn handle_reply(_peer: &Peer, recipient_node_id: &PublicKey, ack: &Ack) -> Result<()> {
        if !ack.accepted {
            tracing::warn!(
                "peer {} rejected our announce",
                recipient_node_id.fmt_short()
            );
            return Err(ProtocolError::Authentication.into());
        }
        Ok(())
    }
}
