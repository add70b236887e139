use iroh::endpoint::SendStream;
use iroh::protocol::AcceptError;
use serde::{Deserialize, Serialize};

use crate::crypto::PublicKey;
use crate::peer::Peer;

use super::bidirectional::BidirectionalHandler;

mod announce;
mod ping;

pub use announce::{Ack, Announce, AnnounceHandler};
pub use ping::{Ping, PingHandler, PingStatus, Pong};

/// Top-level request enum for the replication protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Status exchange and authentication handshake
    Ping(Ping),
    /// Proactive head notification from the writer
    Announce(Announce),
}

impl Message {
    /// Route an incoming request to its handler
    pub(super) async fn dispatch(
        self,
        peer: &Peer,
        sender_node_id: &PublicKey,
        send: SendStream,
    ) -> Result<(), AcceptError> {
        match self {
            Message::Ping(message) => {
                PingHandler::_handle_message(peer, sender_node_id, message, send).await
            }
            Message::Announce(message) => {
                AnnounceHandler::_handle_message(peer, sender_node_id, message, send).await
            }
        }
    }
}
