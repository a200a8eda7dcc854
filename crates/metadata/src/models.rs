//! Database models mapping to the metadata schema.

use sqlx::FromRow;
use time::OffsetDateTime;

/// Upload session record.
///
/// `bytes_written` mirrors the artifact size for observability; completion
/// decisions always re-stat the artifact itself.
#[derive(Debug, Clone, FromRow)]
pub struct UploadSessionRow {
    /// Derived session key (64-char hex). Primary key.
    pub session_key: String,
    /// Client-supplied original file name. Display/extension use only.
    pub file_name: String,
    pub declared_size: i64,
    pub bytes_written: i64,
    /// `open`, `finalized`, or `failed`.
    pub state: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

/// Anti-forgery form token record. Only the SHA-256 hash is stored.
#[derive(Debug, Clone, FromRow)]
pub struct FormTokenRow {
    pub token_hash: String,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}
