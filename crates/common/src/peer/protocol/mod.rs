use anyhow::anyhow;
use futures::future::BoxFuture;
use iroh::{
    endpoint::Connection,
    protocol::{AcceptError, ProtocolHandler},
};

use crate::crypto::PublicKey;

use super::peer::Peer;

pub mod bidirectional;
mod messages;

use messages::Message;

pub use bidirectional::BidirectionalHandler;
pub use messages::{Ack, Announce, AnnounceHandler, Ping, PingHandler, PingStatus, Pong};

/// ALPN identifier for the skiff replication protocol
pub const ALPN: &[u8] = b"/skiff/0";

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("default error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("peer rejected the drive topic")]
    Authentication,
}

/// Generic connection handler that processes all incoming messages
///
/// This function handles all the boilerplate:
/// - Resolving the authenticated remote node id
/// - Accepting bidirectional streams
/// - Reading and deserializing messages
/// - Dispatching to the appropriate handler
async fn handle_connection(peer: Peer, conn: Connection) -> Result<(), AcceptError> {
    // QUIC already authenticated the remote key during the handshake
    let sender_node_id = conn
        .remote_node_id()
        .map(PublicKey::from)
        .map_err(|e| AcceptError::from(std::io::Error::other(e)))?;

    tracing::debug!("new connection from {}", sender_node_id.fmt_short());

    let (send, mut recv) = conn.accept_bi().await.map_err(|e| {
        tracing::error!("failed to accept bidirectional stream: {}", e);
        AcceptError::from(e)
    })?;

    // 1MB limit; nodes communicate over blobs for anything large
    let message_bytes = recv.read_to_end(1024 * 1024).await.map_err(|e| {
        tracing::error!("failed to read message: {}", e);
        AcceptError::from(std::io::Error::other(e))
    })?;

    let message: Message = bincode::deserialize(&message_bytes).map_err(|e| {
        tracing::error!("failed to deserialize message: {}", e);
        let err: Box<dyn std::error::Error + Send + Sync> =
            anyhow!("failed to deserialize message: {}", e).into();
        AcceptError::from(err)
    })?;

    message.dispatch(&peer, &sender_node_id, send).await
}

// This allows the router to accept connections for this protocol
impl ProtocolHandler for Peer {
    #[allow(refining_impl_trait)]
    fn accept(&self, conn: Connection) -> BoxFuture<'static, Result<(), AcceptError>> {
        let peer = self.clone();
        Box::pin(handle_connection(peer, conn))
    }
}
