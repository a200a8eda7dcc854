//! Filesystem spool for the Hopper upload service.
//!
//! The spool is the staging ground between the HTTP surface and the
//! persistence step:
//! - `parts/` holds request-scoped scratch files for incoming multipart data
//! - `sessions/` holds accumulating chunked-upload artifacts, keyed by
//!   session-key hash
//! - `ready/` holds finalized artifacts awaiting persistence

pub mod error;
pub mod spool;

pub use error::{StorageError, StorageResult};
pub use spool::{AppendOutcome, ScratchPart, Spool};
