//! The single-shot file persistence seam.
//!
//! Downstream of finalization every upload looks the same: one complete
//! artifact plus its display metadata. `FilePersister` is the capability
//! interface for that step; `LocalFilePersister` implements it against a
//! local files directory. Deployments with a CMS or object-store backend
//! supply their own implementation.

use async_trait::async_trait;
use hopper_core::config::PersistConfig;
use hopper_core::upload::FileAttributes;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

/// Persistence errors.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Policy rejection (type/size). The artifact has been cleaned up.
    #[error("{0}")]
    Validation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PersistError> for crate::error::ApiError {
    fn from(e: PersistError) -> Self {
        match e {
            PersistError::Validation(msg) => crate::error::ApiError::Validation(msg),
            PersistError::Io(e) => {
                crate::error::ApiError::Storage(hopper_storage::StorageError::Io(e))
            }
        }
    }
}

/// A finalized artifact awaiting persistence.
#[derive(Debug)]
pub struct PersistCandidate {
    /// Path of the complete artifact (ready area or whole-file scratch).
    pub artifact_path: PathBuf,
    /// Client-supplied original file name. Display/extension use only.
    pub file_name: String,
    /// Artifact size in bytes.
    pub size: u64,
    /// Advisory content type from the client.
    pub content_type: Option<String>,
}

/// A component that validates and stores one complete uploaded file.
#[async_trait]
pub trait FilePersister: Send + Sync {
    /// Check the candidate against persistence policy without side effects.
    async fn validate(&self, candidate: &PersistCandidate) -> Result<(), PersistError>;

    /// Validate and store the candidate, consuming the artifact.
    ///
    /// On policy rejection the artifact is removed so nothing orphaned stays
    /// in the spool.
    async fn persist(&self, candidate: PersistCandidate) -> Result<FileAttributes, PersistError>;
}

/// Persists files into a local directory by atomic rename.
///
/// The files directory must share a filesystem with the spool; rename
/// failures propagate rather than degrading to copy+delete.
pub struct LocalFilePersister {
    config: PersistConfig,
}

impl LocalFilePersister {
    /// Create a new persister, creating the files directory.
    pub async fn new(config: PersistConfig) -> Result<Self, PersistError> {
        fs::create_dir_all(&config.files_path).await?;
        Ok(Self { config })
    }

    fn extension_allowed(&self, name: &str) -> bool {
        if self.config.allowed_extensions.is_empty() {
            return true;
        }
        let Some(ext) = Path::new(name).extension().and_then(|e| e.to_str()) else {
            return false;
        };
        let ext = ext.to_ascii_lowercase();
        self.config.allowed_extensions.iter().any(|a| *a == ext)
    }
}

#[async_trait]
impl FilePersister for LocalFilePersister {
    async fn validate(&self, candidate: &PersistCandidate) -> Result<(), PersistError> {
        let name = sanitize_file_name(&candidate.file_name);

        if !self.extension_allowed(&name) {
            return Err(PersistError::Validation(format!(
                "file extension not allowed for '{name}'"
            )));
        }

        if candidate.size > self.config.max_file_size {
            return Err(PersistError::Validation(format!(
                "file size {} exceeds maximum {}",
                candidate.size, self.config.max_file_size
            )));
        }

        Ok(())
    }

    async fn persist(&self, candidate: PersistCandidate) -> Result<FileAttributes, PersistError> {
        if let Err(e) = self.validate(&candidate).await {
            // Policy rejection cleans up the artifact; nothing may linger.
            if let Err(remove_err) = fs::remove_file(&candidate.artifact_path).await {
                tracing::warn!(error = %remove_err, "failed to remove rejected artifact");
            }
            return Err(e);
        }

        let id = Uuid::new_v4();
        let name = sanitize_file_name(&candidate.file_name);

        let dir = self.config.files_path.join(id.to_string());
        fs::create_dir_all(&dir).await?;
        fs::rename(&candidate.artifact_path, dir.join(&name)).await?;

        let url = format!(
            "{}/{}/{}",
            self.config.public_base_url.trim_end_matches('/'),
            id,
            name
        );

        tracing::info!(file_id = %id, size = candidate.size, "file persisted");

        Ok(FileAttributes {
            id,
            name,
            size: candidate.size,
            url,
            content_type: candidate.content_type,
        })
    }
}

/// Reduce a client-supplied name to a safe display/storage name.
///
/// Takes the last path segment, drops control characters and separator
/// bytes, and never returns an empty or dot-only name.
pub fn sanitize_file_name(name: &str) -> String {
    let last_segment = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name);

    let cleaned: String = last_segment
        .chars()
        .filter(|c| !c.is_control() && *c != '/' && *c != '\\' && *c != '\0')
        .collect();

    let trimmed = cleaned.trim_matches([' ', '.']);
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}
