//! API error types.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use hopper_metadata::MetadataError;
use hopper_storage::StorageError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("uploads forbidden: {0}")]
    Forbidden(String),

    #[error("invalid or expired form token")]
    InvalidFormToken,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("another chunk for this upload is in flight")]
    Busy,

    #[error("upload exceeds declared size: {artifact_len} bytes on disk, {declared_size} declared")]
    Overshoot {
        artifact_len: u64,
        declared_size: u64,
    },

    #[error("file rejected: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("core error: {0}")]
    Core(#[from] hopper_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Forbidden(_) => "forbidden",
            Self::InvalidFormToken => "invalid_form_token",
            Self::BadRequest(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::Busy => "busy",
            Self::Overshoot { .. } => "overshoot",
            Self::Validation(_) => "validation_failed",
            Self::Internal(_) => "internal_error",
            Self::Storage(e) => match e {
                StorageError::OffsetMismatch { .. } => "offset_mismatch",
                StorageError::NotFound(_) => "not_found",
                StorageError::InvalidKey(_) => "invalid_key",
                StorageError::Io(_) => "storage_error",
            },
            Self::Metadata(_) => "metadata_error",
            Self::Core(_) => "bad_request",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::InvalidFormToken => StatusCode::BAD_REQUEST,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Busy => StatusCode::CONFLICT,
            Self::Overshoot { .. } => StatusCode::CONFLICT,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(e) => match e {
                StorageError::OffsetMismatch { .. } => StatusCode::CONFLICT,
                StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Metadata(e) => match e {
                MetadataError::NotFound(_) => StatusCode::NOT_FOUND,
                MetadataError::AlreadyExists(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// The message sent to clients.
    ///
    /// Storage, metadata, and internal errors collapse to their class name:
    /// io error strings can carry filesystem paths and must not leave the
    /// process.
    fn public_message(&self) -> String {
        match self {
            Self::Storage(StorageError::OffsetMismatch {
                artifact_len,
                declared_offset,
            }) => format!(
                "offset mismatch: artifact has {artifact_len} bytes, chunk declared offset {declared_offset}"
            ),
            Self::Storage(_) => "storage failure".to_string(),
            Self::Metadata(_) => "metadata store failure".to_string(),
            Self::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        }
        // The upload wire contract is a one-element JSON array served as
        // text/plain; errors use the same envelope.
        let body = serde_json::json!([{
            "error": self.public_message(),
            "code": self.code(),
        }]);
        (
            status,
            [(header::CONTENT_TYPE, "text/plain")],
            body.to_string(),
        )
            .into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
