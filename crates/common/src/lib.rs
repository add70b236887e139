/**
 * Cryptographic types and operations.
 *  - Public and Private key implementations
 *  - Discovery topic derivation
 */
pub mod crypto;
/**
 * Versioned drive implementation.
 * A path -> content index with a strictly
 *  monotonic version counter, persisted as a
 *  signed snapshot chain in the content store.
 */
pub mod drive;
/**
 * Local mirror engine.
 *  - push: import files from a local folder into a drive
 *  - pull: materialize a replicated drive onto disk
 */
pub mod mirror;
/**
 * Storage and networking layer.
 *  A light wrapper around the Iroh-Blobs
 *  protocol plus our own ALPN handler for
 *  replication control messages.
 */
pub mod peer;
/**
 * Session lifecycle control.
 * Glues a drive, a peer, and a mirror together
 *  and surfaces status events to the host.
 */
pub mod session;
/**
 * Test harness for multi-peer integration tests.
 */
pub mod testkit;

pub mod prelude {
    pub use crate::crypto::{PublicKey, SecretKey, Topic};
    pub use crate::drive::{Drive, DriveError, Entry, EntryChange};
    pub use crate::peer::{BlobsStore, Peer};
    pub use crate::session::{Session, SessionConfig, SessionEvent, Severity};
}
