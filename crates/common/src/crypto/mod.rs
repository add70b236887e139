//! Cryptographic primitives for skiff
//!
//! This module provides the identity layer for skiff's sharing model:
//!
//! - **Identity & Authentication**: Ed25519 keypairs for peer identity
//! - **Provenance**: detached Ed25519 signatures over drive snapshots
//! - **Rendezvous**: one-way discovery topic derivation from a public key
//!
//! # Sharing Model
//!
//! ## Drive Identity
//! A shared drive is identified by the Ed25519 keypair of the peer that
//! created it. The public half, rendered as hex, is the string a sender
//! hands to receivers. It doubles as the sender's dialable network identity,
//! so holding the key is sufficient to find and authenticate the sender.
//!
//! ## Discovery Topic
//! Both sides derive a 32-byte topic from the drive public key with a
//! domain-separated SHA-256. The topic is presented in the first message of
//! every control exchange: it proves the remote actually holds the share
//! key without putting the key itself on the wire in a new context.
//!
//! ## Snapshot Provenance
//! Every committed drive version is signed by the drive secret key.
//! Receivers verify the signature chain before applying anything, so a
//! peer that can reach us still cannot forge drive history.

mod keys;
mod topic;

pub use ed25519_dalek::Signature;
pub use keys::{KeyError, PublicKey, SecretKey, PUBLIC_KEY_SIZE};
pub use topic::Topic;
