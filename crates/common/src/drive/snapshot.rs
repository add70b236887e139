use iroh_blobs::Hash;
use serde::{Deserialize, Serialize};

use crate::crypto::{PublicKey, SecretKey};

use super::entry::EntryChange;

/// Errors raised while encoding, decoding, or verifying snapshots
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("snapshot names drive {got}, expected {expected}")]
    WrongDrive { expected: String, got: String },
    #[error("snapshot carries a malformed signature")]
    MalformedSignature,
    #[error("snapshot signature does not verify against the drive key")]
    InvalidSignature,
}

/// One committed drive version
///
/// Snapshots form a hash-linked chain through `previous`: the chain is the
/// drive's append-only entry log, stored block by block in the content
/// store. Each snapshot records only the changes committed at its version;
/// replaying the chain from genesis rebuilds the full path index.
///
/// The signature covers everything except itself and is made with the
/// drive secret key, so replicas can verify history came from the drive
/// owner before applying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The drive this snapshot belongs to
    pub drive: PublicKey,
    /// Version committed by this snapshot
    pub version: u64,
    /// Hash of the previous snapshot block; `None` at genesis
    pub previous: Option<Hash>,
    /// Changes committed at this version
    pub changes: Vec<EntryChange>,
    /// Detached Ed25519 signature over the fields above
    signature: Vec<u8>,
}

impl Snapshot {
    /// Build and sign a snapshot for the next drive version
    pub fn create(
        secret: &SecretKey,
        version: u64,
        previous: Option<Hash>,
        changes: Vec<EntryChange>,
    ) -> Result<Self, SnapshotError> {
        let mut snapshot = Self {
            drive: secret.public(),
            version,
            previous,
            changes,
            signature: Vec::new(),
        };
        let body = snapshot.signable()?;
        snapshot.signature = secret.sign(&body).to_bytes().to_vec();
        Ok(snapshot)
    }

    /// Verify that this snapshot was signed by `key` and claims to belong
    /// to that drive
    pub fn verify(&self, key: &PublicKey) -> Result<(), SnapshotError> {
        if &self.drive != key {
            return Err(SnapshotError::WrongDrive {
                expected: key.to_hex(),
                got: self.drive.to_hex(),
            });
        }
        let signature = ed25519_dalek::Signature::from_slice(&self.signature)
            .map_err(|_| SnapshotError::MalformedSignature)?;
        key.verify(&self.signable()?, &signature)
            .map_err(|_| SnapshotError::InvalidSignature)
    }

    pub fn encode(&self) -> Result<Vec<u8>, SnapshotError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SnapshotError> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// The byte string the signature is made over
    fn signable(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(&(&self.drive, self.version, &self.previous, &self.changes))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::drive::entry::{Entry, EntryChange};

    fn sample_change(version: u64) -> EntryChange {
        EntryChange::added(Entry {
            path: "docs/readme.md".to_string(),
            hash: Hash::from_bytes([7u8; 32]),
            size: 42,
            version,
        })
    }

    #[test]
    fn test_sign_and_verify() {
        let secret = SecretKey::generate();
        let snapshot = Snapshot::create(&secret, 1, None, vec![sample_change(1)]).unwrap();
        assert!(snapshot.verify(&secret.public()).is_ok());
    }

    #[test]
    fn test_tampered_snapshot_fails_verification() {
        let secret = SecretKey::generate();
        let mut snapshot = Snapshot::create(&secret, 1, None, vec![sample_change(1)]).unwrap();
        snapshot.version = 2;
        assert!(matches!(
            snapshot.verify(&secret.public()),
            Err(SnapshotError::InvalidSignature)
        ));
    }

    #[test]
    fn test_wrong_key_fails_verification() {
        let secret = SecretKey::generate();
        let other = SecretKey::generate();
        let snapshot = Snapshot::create(&secret, 1, None, vec![sample_change(1)]).unwrap();
        assert!(matches!(
            snapshot.verify(&other.public()),
            Err(SnapshotError::WrongDrive { .. })
        ));
    }

    #[test]
    fn test_codec_round_trip() {
        let secret = SecretKey::generate();
        let previous = Some(Hash::from_bytes([3u8; 32]));
        let snapshot = Snapshot::create(&secret, 9, previous, vec![sample_change(9)]).unwrap();

        let bytes = snapshot.encode().unwrap();
        let decoded = Snapshot::decode(&bytes).unwrap();
        assert_eq!(snapshot, decoded);
        assert!(decoded.verify(&secret.public()).is_ok());
    }
}
