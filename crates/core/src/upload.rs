//! Wire-level payloads for the upload endpoint.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Progress report for an incomplete chunked upload.
///
/// Deliberately carries only byte counts: spool paths are server internals
/// and never leave the process.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressInfo {
    /// Bytes accumulated on disk so far.
    pub bytes_written: u64,
    /// Declared total size of the upload.
    pub total_expected: u64,
}

/// Attributes of a persisted file, returned on upload success.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileAttributes {
    /// Server-assigned file identifier.
    pub id: Uuid,
    /// Display name, sanitized from the client-supplied original.
    pub name: String,
    /// File size in bytes.
    pub size: u64,
    /// Public URL for the persisted file.
    pub url: String,
    /// Advisory content type, if the client supplied one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Response from minting an anti-forgery form token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FormTokenResponse {
    /// The raw token value, to be embedded in the upload form.
    pub token: String,
    /// RFC 3339 expiry timestamp.
    pub expires_at: String,
}

/// Capability report for upload clients.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Capabilities {
    /// Largest chunk a client should send in one request.
    pub max_chunk_size: u64,
}
