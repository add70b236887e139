//! Session lifecycle control
//!
//! A [`Session`] is one active share: sender side (create, import, announce)
//! or receiver side (join, sync, mirror). It glues a drive, a peer, and a
//! mirror together, runs their background tasks, and surfaces progress as
//! [`SessionEvent`]s instead of printing anything itself.

mod events;
mod session;

pub use events::{EventSender, SessionEvent, Severity};
pub use session::{Session, SessionConfig, SessionError};
