//! Spool error types.

use thiserror::Error;

/// Spool operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("offset mismatch: artifact has {artifact_len} bytes, chunk declared offset {declared_offset}")]
    OffsetMismatch {
        artifact_len: u64,
        declared_offset: u64,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for spool operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
