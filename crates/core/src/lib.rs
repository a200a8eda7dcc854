//! Core domain types and shared logic for the Hopper upload service.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Session keys and the upload session lifecycle
//! - Completion checking against the declared total size
//! - Wire-level response payloads
//! - Application configuration

pub mod config;
pub mod error;
pub mod session;
pub mod upload;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use session::{Completion, SessionKey, SessionState, UploadSession};
pub use upload::{Capabilities, FileAttributes, FormTokenResponse, ProgressInfo};

/// Default server-side upload limit: 32 MiB per request body.
pub const DEFAULT_UPLOAD_LIMIT: u64 = 32 * 1024 * 1024;

/// Default POST body size limit: 34 MiB (upload limit plus multipart framing).
pub const DEFAULT_POST_SIZE_LIMIT: u64 = 34 * 1024 * 1024;

/// Sentinel used in place of a missing security token when deriving identity.
pub const MISSING_TOKEN_SENTINEL: &str = "none";
