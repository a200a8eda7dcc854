//! The spool: scratch parts, accumulating artifacts, ready artifacts.

use crate::error::{StorageError, StorageResult};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::instrument;
use uuid::Uuid;

/// Buffer size for streaming appends (64 KiB). Memory use per request is
/// bounded by this regardless of chunk size.
const STREAM_BUF_SIZE: usize = 64 * 1024;

/// Area for request-scoped scratch files.
const PARTS_DIR: &str = "parts";

/// Area for accumulating session artifacts.
const SESSIONS_DIR: &str = "sessions";

/// Area for finalized artifacts awaiting persistence.
const READY_DIR: &str = "ready";

/// Result of appending one chunk to a session artifact.
#[derive(Clone, Copy, Debug)]
pub struct AppendOutcome {
    /// Bytes appended by this call.
    pub appended: u64,
    /// Artifact size after the append.
    pub total: u64,
}

/// Filesystem staging area for uploads.
///
/// All three areas live under one root so that promotion and persistence
/// can rely on atomic rename.
pub struct Spool {
    root: PathBuf,
}

impl Spool {
    /// Create a new spool, creating its area directories.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        for area in [PARTS_DIR, SESSIONS_DIR, READY_DIR] {
            fs::create_dir_all(root.join(area)).await?;
        }
        Ok(Self { root })
    }

    /// The spool root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate a session key: relative, no traversal, normal components.
    ///
    /// Keys are server-derived hash strings; anything else is a bug or an
    /// attack, so reject loudly.
    fn validate_key(key: &str) -> StorageResult<()> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey("empty key".to_string()));
        }
        if key.contains("..") || key.starts_with('/') || key.starts_with('\\') {
            return Err(StorageError::InvalidKey(format!(
                "path traversal not allowed: {key}"
            )));
        }
        for component in Path::new(key).components() {
            match component {
                std::path::Component::Normal(_) => {}
                _ => {
                    return Err(StorageError::InvalidKey(format!(
                        "contains unsafe path component: {key}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Resolve a session key to its artifact path.
    fn session_path(&self, key: &str) -> StorageResult<PathBuf> {
        Self::validate_key(key)?;
        Ok(self.root.join(SESSIONS_DIR).join(key))
    }

    /// Open a new scratch part for an incoming multipart file field.
    #[instrument(skip(self))]
    pub async fn create_part(&self) -> StorageResult<ScratchPart> {
        let path = self
            .root
            .join(PARTS_DIR)
            .join(format!("part-{}", Uuid::new_v4()));
        let file = fs::File::create(&path).await?;
        Ok(ScratchPart { file, path, len: 0 })
    }

    /// Append one chunk's bytes from a scratch file onto a session artifact.
    ///
    /// Creates the artifact on first chunk. When `declared_offset` is given,
    /// it must equal the artifact's current length; a mismatched request is
    /// rejected without touching the artifact. On any write failure the
    /// artifact is truncated back to its pre-append length so a client retry
    /// continues from a known-good state.
    #[instrument(skip(self, source), fields(key = %key))]
    pub async fn append_chunk(
        &self,
        key: &str,
        source: &Path,
        declared_offset: Option<u64>,
    ) -> StorageResult<AppendOutcome> {
        let dest = self.session_path(key)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Stat before opening so an offset-mismatched first chunk does not
        // leave an empty artifact behind.
        let start = match fs::metadata(&dest).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(StorageError::Io(e)),
        };

        if let Some(offset) = declared_offset
            && offset != start
        {
            return Err(StorageError::OffsetMismatch {
                artifact_len: start,
                declared_offset: offset,
            });
        }

        let mut src = fs::File::open(source).await?;
        let mut out = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&dest)
            .await?;

        let mut buf = vec![0u8; STREAM_BUF_SIZE];
        let mut appended: u64 = 0;
        loop {
            let n = match src.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    restore_length(&out, start).await;
                    return Err(StorageError::Io(e));
                }
            };
            if n == 0 {
                break;
            }
            if let Err(e) = out.write_all(&buf[..n]).await {
                restore_length(&out, start).await;
                return Err(StorageError::Io(e));
            }
            appended += n as u64;
        }

        // The chunk lands as a unit: flushed to disk before the request is
        // answered, or rolled back entirely.
        if let Err(e) = out.sync_all().await {
            restore_length(&out, start).await;
            return Err(StorageError::Io(e));
        }

        Ok(AppendOutcome {
            appended,
            total: start + appended,
        })
    }

    /// Current size of a session artifact, or None if no chunk arrived yet.
    #[instrument(skip(self))]
    pub async fn artifact_len(&self, key: &str) -> StorageResult<Option<u64>> {
        let path = self.session_path(key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Remove a session artifact.
    #[instrument(skip(self))]
    pub async fn remove_artifact(&self, key: &str) -> StorageResult<()> {
        let path = self.session_path(key)?;
        fs::remove_file(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(e)
            }
        })
    }

    /// Promote a completed session artifact into the ready area.
    ///
    /// Atomic rename within the spool filesystem. After this the session
    /// key no longer resolves to any file. Rename failures (including
    /// cross-device setups) surface as errors; there is no copy fallback.
    #[instrument(skip(self))]
    pub async fn promote(&self, key: &str) -> StorageResult<PathBuf> {
        let from = self.session_path(key)?;
        let to = self
            .root
            .join(READY_DIR)
            .join(format!("ready-{}", Uuid::new_v4()));
        fs::rename(&from, &to).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(to)
    }

    /// Remove a scratch part that is no longer needed.
    #[instrument(skip(self, path))]
    pub async fn discard_part(&self, path: &Path) -> StorageResult<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// List session keys whose artifacts were last modified before `cutoff`.
    /// Used by the sweep to find abandoned and orphaned sessions.
    #[instrument(skip(self, cutoff))]
    pub async fn stale_session_keys(&self, cutoff: SystemTime) -> StorageResult<Vec<String>> {
        let base = self.root.join(SESSIONS_DIR);
        let mut keys = Vec::new();

        let mut fanouts = fs::read_dir(&base).await?;
        while let Some(fanout) = fanouts.next_entry().await? {
            if !fanout.file_type().await?.is_dir() {
                continue;
            }
            let fanout_name = fanout.file_name().to_string_lossy().to_string();
            let mut entries = fs::read_dir(fanout.path()).await?;
            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_file() {
                    continue;
                }
                let modified = entry.metadata().await?.modified()?;
                if modified < cutoff {
                    keys.push(format!(
                        "{}/{}",
                        fanout_name,
                        entry.file_name().to_string_lossy()
                    ));
                }
            }
        }

        Ok(keys)
    }

    /// Delete scratch parts and ready artifacts older than `cutoff`.
    /// Returns the number of files removed.
    #[instrument(skip(self, cutoff))]
    pub async fn sweep_scratch(&self, cutoff: SystemTime) -> StorageResult<u64> {
        let mut removed = 0u64;
        for area in [PARTS_DIR, READY_DIR] {
            let mut entries = fs::read_dir(self.root.join(area)).await?;
            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_file() {
                    continue;
                }
                let modified = entry.metadata().await?.modified()?;
                if modified < cutoff {
                    match fs::remove_file(entry.path()).await {
                        Ok(()) => removed += 1,
                        // Raced with a concurrent consumer; nothing to do.
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => return Err(StorageError::Io(e)),
                    }
                }
            }
        }
        Ok(removed)
    }
}

/// Best-effort rollback of a failed append.
async fn restore_length(file: &fs::File, len: u64) {
    if let Err(e) = file.set_len(len).await {
        tracing::error!(len, error = %e, "failed to restore artifact length after append error");
    } else {
        let _ = file.sync_all().await;
    }
}

/// A request-scoped scratch file receiving one multipart file field.
pub struct ScratchPart {
    file: fs::File,
    path: PathBuf,
    len: u64,
}

impl ScratchPart {
    /// Write a buffer of field data.
    pub async fn write(&mut self, data: &[u8]) -> StorageResult<()> {
        self.file.write_all(data).await?;
        self.len += data.len() as u64;
        Ok(())
    }

    /// Bytes written so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether anything has been written yet.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The scratch file's path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close, returning the scratch path and byte count.
    pub async fn finish(mut self) -> StorageResult<(PathBuf, u64)> {
        self.file.flush().await?;
        Ok((self.path, self.len))
    }

    /// Discard the scratch file.
    pub async fn abort(self) -> StorageResult<()> {
        drop(self.file);
        let _ = fs::remove_file(&self.path).await;
        Ok(())
    }
}
