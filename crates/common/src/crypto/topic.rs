use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::PublicKey;

/// Domain separation for topic derivation. Changing this is a protocol break.
const TOPIC_CONTEXT: &[u8] = b"skiff/topic/v0";

/// Rendezvous topic for a shared drive
///
/// Derived one-way from the drive public key, so the topic can be compared
/// and logged freely without revealing the key it came from. Peers present
/// the topic in the first message of every exchange; a peer that cannot
/// produce it does not hold the share key and is turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic([u8; 32]);

impl Topic {
    /// Derive the topic for a drive key
    pub fn derive(key: &PublicKey) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(TOPIC_CONTEXT);
        hasher.update(key.to_bytes());
        Topic(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex rendering for logs
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}
