//! Local mirror engine
//!
//! Projects between a drive and the local filesystem, in two directions:
//!
//! - **Push** (sender): [`import_dir`] and [`import_file`] read local files
//!   and commit them to the drive. Imports happen on explicit action; there
//!   is no filesystem watcher.
//! - **Pull** (receiver): [`MirrorEngine`] materializes the drive under a
//!   target directory, then follows the drive's version feed and applies
//!   each diff as it lands. File writes go through a temp file and rename,
//!   and one broken file never stops the rest of a batch.

mod engine;
mod import;

pub use engine::{MirrorEngine, MirrorError};
pub use import::{import_dir, import_file};
