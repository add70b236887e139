use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::crypto::PublicKey;
use crate::session::EventSender;

/// Registry of remote peers that have authenticated against our drive
///
/// A peer enters the registry on its first valid exchange (a ping or
/// announce carrying the right topic) and leaves it when an exchange with
/// it fails. Each entry remembers the last drive version the peer
/// reported. Every membership change emits a peer-count event.
#[derive(Debug, Clone)]
pub struct PeerRegistry {
    peers: Arc<Mutex<HashMap<PublicKey, u64>>>,
    events: EventSender,
}

impl PeerRegistry {
    pub fn new(events: EventSender) -> Self {
        Self {
            peers: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    /// Record an authenticated contact from `peer_id` at `version`
    pub fn register(&self, peer_id: PublicKey, version: u64) {
        let (is_new, count) = {
            let mut peers = self.peers.lock();
            let is_new = peers.insert(peer_id, version).is_none();
            (is_new, peers.len())
        };
        if is_new {
            tracing::info!("peer {} connected, {} total", peer_id.fmt_short(), count);
            self.events.peer_count(count);
        }
    }

    /// Forget `peer_id` after a failed exchange
    pub fn deregister(&self, peer_id: &PublicKey) {
        let (removed, count) = {
            let mut peers = self.peers.lock();
            let removed = peers.remove(peer_id).is_some();
            (removed, peers.len())
        };
        if removed {
            tracing::info!("peer {} disconnected, {} total", peer_id.fmt_short(), count);
            self.events.peer_count(count);
        }
    }

    /// All currently registered peers
    pub fn peers(&self) -> Vec<PublicKey> {
        self.peers.lock().keys().copied().collect()
    }

    pub fn count(&self) -> usize {
        self.peers.lock().len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::SecretKey;
    use crate::session::SessionEvent;

    #[test]
    fn test_register_and_deregister_emit_counts() {
        let (events, rx) = EventSender::new();
        let registry = PeerRegistry::new(events);
        let peer = SecretKey::generate().public();

        registry.register(peer, 4);
        assert_eq!(registry.count(), 1);
        assert!(matches!(rx.recv().unwrap(), SessionEvent::PeerCount(1)));

        // a repeat contact updates the version but emits nothing
        registry.register(peer, 5);
        assert_eq!(registry.count(), 1);
        assert!(rx.try_recv().is_err());

        registry.deregister(&peer);
        assert_eq!(registry.count(), 0);
        assert!(matches!(rx.recv().unwrap(), SessionEvent::PeerCount(0)));
    }

    #[test]
    fn test_deregister_unknown_peer_is_silent() {
        let (events, rx) = EventSender::new();
        let registry = PeerRegistry::new(events);

        registry.deregister(&SecretKey::generate().public());
        assert!(rx.try_recv().is_err());
    }
}
