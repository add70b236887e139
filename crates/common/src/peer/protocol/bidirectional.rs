use std::fmt::Debug;

use anyhow::{anyhow, Result};
use iroh::endpoint::SendStream;
use iroh::protocol::AcceptError;
use iroh::Endpoint;
use serde::{Deserialize, Serialize};

use crate::crypto::PublicKey;
use crate::peer::Peer;

use super::{messages::Message, ALPN};

/// Generic trait for handling bidirectional stream protocols
///
/// This trait eliminates boilerplate by providing default implementations
/// for all the serialization, stream I/O, and error handling logic.
///
/// Implementors only need to define the business logic:
/// - `handle_message`: What to send back when receiving a request (responder side)
/// - `handle_reply`: What to do when receiving a reply (initiator side)
pub trait BidirectionalHandler: Sized {
    /// The request message type
    type Message: Serialize + for<'de> Deserialize<'de> + Debug + Send + Sync;

    /// The reply message type
    type Reply: Serialize + for<'de> Deserialize<'de> + Debug + Send + Sync;

    /// Wrap the request in the [`Message`] enum
    ///
    /// Requests must go over the wire wrapped so the responder knows which
    /// handler to dispatch to. Replies travel bare, since the initiator
    /// already knows which exchange it started.
    fn wrap_request(request: Self::Message) -> Message;

    /// Handle an incoming request and generate a reply
    ///
    /// **Responder side:** Called when a request is received. Implement
    /// only the business logic; serialization and stream I/O are handled
    /// automatically.
    fn handle_message(
        peer: &Peer,
        sender_node_id: &PublicKey,
        message: &Self::Message,
    ) -> impl std::future::Future<Output = Self::Reply> + Send;

    /// Handle an incoming reply and take action
    ///
    /// **Initiator side:** Called when a reply is received.
    fn handle_reply(
        peer: &Peer,
        recipient_node_id: &PublicKey,
        reply: &Self::Reply,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Side effects after a reply has been sent
    ///
    /// **Responder side:** Runs after the reply is on the wire, so slow
    /// work here never blocks the initiator. Default does nothing.
    fn handle_message_side_effect(
        _peer: &Peer,
        _sender_node_id: &PublicKey,
        _message: &Self::Message,
        _reply: &Self::Reply,
    ) -> impl std::future::Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }

    /// Send a request to a peer and automatically handle the reply
    async fn send(
        peer: &Peer,
        recipient_node_id: &PublicKey,
        message: Self::Message,
    ) -> Result<Self::Reply> {
        let reply = Self::_handle_send(peer.endpoint(), recipient_node_id, message).await?;
        Self::handle_reply(peer, recipient_node_id, &reply).await?;
        Ok(reply)
    }

    /// Process an incoming request on the responder peer
    ///
    /// Called by message dispatch; there is no need to call this directly.
    /// Runs the handler, writes the reply to the stream, finishes the
    /// stream, then runs the side-effect hook.
    async fn _handle_message(
        peer: &Peer,
        sender_node_id: &PublicKey,
        message: Self::Message,
        mut send: SendStream,
    ) -> Result<(), AcceptError> {
        let reply = Self::handle_message(peer, sender_node_id, &message).await;

        let reply_bytes = bincode::serialize(&reply).map_err(|e| {
            tracing::error!("failed to serialize reply: {}", e);
            let err: Box<dyn std::error::Error + Send + Sync> =
                anyhow!("failed to serialize reply: {}", e).into();
            AcceptError::from(err)
        })?;

        send.write_all(&reply_bytes).await.map_err(|e| {
            tracing::error!("failed to send reply: {}", e);
            AcceptError::from(std::io::Error::other(e))
        })?;

        send.finish().map_err(|e| {
            tracing::error!("failed to finish stream: {}", e);
            AcceptError::from(std::io::Error::other(e))
        })?;

        // reply is already on the wire; a failed side effect only gets logged
        if let Err(e) =
            Self::handle_message_side_effect(peer, sender_node_id, &message, &reply).await
        {
            tracing::error!("error in side effect hook: {}", e);
        }

        Ok(())
    }

    /// Send a request to a peer and return the raw reply
    ///
    /// Connects, opens a bi-stream, writes the wrapped request, reads the
    /// reply. Use [`BidirectionalHandler::send`] if you also want
    /// `handle_reply` to run on the result.
    async fn _handle_send(
        endpoint: &Endpoint,
        recipient_node_id: &PublicKey,
        message: Self::Message,
    ) -> Result<Self::Reply> {
        let conn = endpoint
            .connect(**recipient_node_id, ALPN)
            .await
            .map_err(|e| anyhow!("failed to connect to peer: {}", e))?;

        let (mut send, mut recv) = conn
            .open_bi()
            .await
            .map_err(|e| anyhow!("failed to open bidirectional stream: {}", e))?;

        let message = Self::wrap_request(message);
        let request_bytes =
            bincode::serialize(&message).map_err(|e| anyhow!("failed to serialize request: {}", e))?;

        send.write_all(&request_bytes)
            .await
            .map_err(|e| anyhow!("failed to write request: {}", e))?;

        send.finish()
            .map_err(|e| anyhow!("failed to finish sending request: {}", e))?;

        // request limit is 1MB; anything large travels over blobs instead
        let reply_bytes = recv
            .read_to_end(1024 * 1024)
            .await
            .map_err(|e| anyhow!("failed to read reply: {}", e))?;

        let reply: Self::Reply = bincode::deserialize(&reply_bytes)
            .map_err(|e| anyhow!("failed to deserialize reply: {}", e))?;

        tracing::debug!(
            "exchange with {} complete: {:?}",
            recipient_node_id.fmt_short(),
            reply
        );

        Ok(reply)
    }
}
