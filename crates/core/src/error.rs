//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid session key: {0}")]
    InvalidSessionKey(String),

    #[error("upload session error: {0}")]
    Session(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
