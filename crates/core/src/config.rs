//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// Fraction of the smaller body limit advertised to chunking clients,
/// leaving headroom for multipart framing overhead.
const CHUNK_SIZE_HEADROOM: f64 = 0.9;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum size of a single uploaded file part in bytes.
    #[serde(default = "default_upload_limit")]
    pub upload_limit: u64,
    /// Maximum size of a POST body in bytes (part plus multipart framing).
    #[serde(default = "default_post_size_limit")]
    pub post_size_limit: u64,
    /// Upload session timeout in seconds. Sessions idle past this are swept.
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
    /// Anti-forgery form token lifetime in seconds.
    #[serde(default = "default_form_token_ttl_secs")]
    pub form_token_ttl_secs: u64,
    /// Whether the upload endpoint accepts requests at all.
    #[serde(default = "default_true")]
    pub uploads_enabled: bool,
    /// Reject all writes while still answering capability queries.
    #[serde(default)]
    pub read_only: bool,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// When enabled, restrict the endpoint to scraper IPs at the
    /// infrastructure level.
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_upload_limit() -> u64 {
    crate::DEFAULT_UPLOAD_LIMIT
}

fn default_post_size_limit() -> u64 {
    crate::DEFAULT_POST_SIZE_LIMIT
}

fn default_session_timeout_secs() -> u64 {
    86400 // 24 hours
}

fn default_form_token_ttl_secs() -> u64 {
    7200 // 2 hours, the lifetime of a form page
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            upload_limit: default_upload_limit(),
            post_size_limit: default_post_size_limit(),
            session_timeout_secs: default_session_timeout_secs(),
            form_token_ttl_secs: default_form_token_ttl_secs(),
            uploads_enabled: true,
            read_only: false,
            metrics_enabled: default_true(),
        }
    }
}

impl ServerConfig {
    /// The chunk size advertised to clients slicing large files.
    ///
    /// Computed once from the injected limits rather than read from ambient
    /// process settings: 90% of the smaller of the two body limits.
    pub fn max_chunk_size(&self) -> u64 {
        let limit = self.upload_limit.min(self.post_size_limit);
        (limit as f64 * CHUNK_SIZE_HEADROOM).round() as u64
    }

    /// Get the session timeout as a Duration.
    pub fn session_timeout(&self) -> Duration {
        let secs = i64::try_from(self.session_timeout_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs)
    }

    /// Get the form token lifetime as a Duration.
    pub fn form_token_ttl(&self) -> Duration {
        let secs = i64::try_from(self.form_token_ttl_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs)
    }
}

/// Spool (staging filesystem) configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpoolConfig {
    /// Root directory for the spool tree.
    #[serde(default = "default_spool_path")]
    pub path: PathBuf,
}

fn default_spool_path() -> PathBuf {
    PathBuf::from("./data/spool")
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            path: default_spool_path(),
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// SQLite database file path.
    #[serde(default = "default_metadata_path")]
    pub path: PathBuf,
}

fn default_metadata_path() -> PathBuf {
    PathBuf::from("./data/metadata.db")
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            path: default_metadata_path(),
        }
    }
}

/// File persistence policy and destination.
///
/// The files area must live on the same filesystem as the spool: persistence
/// promotes artifacts by rename and never falls back to copy+delete.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistConfig {
    /// Directory receiving persisted files.
    #[serde(default = "default_files_path")]
    pub files_path: PathBuf,
    /// Base URL prefix for persisted file URLs.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
    /// Allowed file extensions (lowercase, no dot). Empty allows any.
    #[serde(default)]
    pub allowed_extensions: Vec<String>,
    /// Maximum size of a persisted file in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

fn default_files_path() -> PathBuf {
    PathBuf::from("./data/files")
}

fn default_public_base_url() -> String {
    "/files".to_string()
}

fn default_max_file_size() -> u64 {
    2 * 1024 * 1024 * 1024 // 2 GiB
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            files_path: default_files_path(),
            public_base_url: default_public_base_url(),
            allowed_extensions: Vec::new(),
            max_file_size: default_max_file_size(),
        }
    }
}

/// Background sweep configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Whether the sweep task runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between sweep runs.
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl SweepConfig {
    /// Validate sweep configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.enabled && self.interval_secs == 0 {
            return Err("sweep.interval_secs must be nonzero when enabled".to_string());
        }
        Ok(())
    }
}

/// Top-level application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub spool: SpoolConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub persist: PersistConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
}

impl AppConfig {
    /// Create a test configuration with small limits and sweep disabled.
    ///
    /// **For testing only.** Paths still need to be pointed at a tempdir.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig {
                upload_limit: 1024 * 1024,
                post_size_limit: 1024 * 1024 + 64 * 1024,
                session_timeout_secs: 60,
                form_token_ttl_secs: 60,
                ..Default::default()
            },
            sweep: SweepConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
