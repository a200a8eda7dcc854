//! Common test utilities and fixtures.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use hopper_core::config::AppConfig;
use hopper_metadata::models::FormTokenRow;
use hopper_metadata::{SessionStore, SqliteStore};
use hopper_server::persist::LocalFilePersister;
use hopper_server::{AppState, create_router};
use hopper_storage::Spool;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use time::OffsetDateTime;
use tower::ServiceExt;
use uuid::Uuid;

/// Multipart boundary used by the test body builder.
pub const BOUNDARY: &str = "hopper-test-boundary";

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let mut config = AppConfig::for_testing();
        config.spool.path = temp_dir.path().join("spool");
        config.metadata.path = temp_dir.path().join("metadata.db");
        config.persist.files_path = temp_dir.path().join("files");
        modifier(&mut config);

        let spool = Arc::new(
            Spool::new(&config.spool.path)
                .await
                .expect("Failed to create spool"),
        );

        let sessions: Arc<dyn SessionStore> = Arc::new(
            SqliteStore::new(&config.metadata.path)
                .await
                .expect("Failed to create metadata store"),
        );

        let persister = Arc::new(
            LocalFilePersister::new(config.persist.clone())
                .await
                .expect("Failed to create persister"),
        );

        let state = AppState::new(config, spool, sessions, persister);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            temp_dir,
        }
    }

    /// Get access to the underlying session store.
    pub fn sessions(&self) -> Arc<dyn SessionStore> {
        self.state.sessions.clone()
    }

    /// Mint a valid form token directly in the store, returning the raw value.
    pub async fn mint_token(&self) -> String {
        let raw = format!("test-form-token-{}", Uuid::new_v4());
        self.insert_token(&raw, 300).await;
        raw
    }

    /// Insert a form token with the given TTL (seconds; negative = expired).
    pub async fn insert_token(&self, raw: &str, ttl_secs: i64) {
        let now = OffsetDateTime::now_utc();
        self.state
            .sessions
            .create_form_token(&FormTokenRow {
                token_hash: hopper_server::auth::hash_token(raw),
                created_at: now,
                expires_at: now + time::Duration::seconds(ttl_secs),
            })
            .await
            .expect("Failed to insert form token");
    }

    pub fn spool_dir(&self, area: &str) -> PathBuf {
        self.temp_dir.path().join("spool").join(area)
    }

    pub fn files_dir(&self) -> PathBuf {
        self.temp_dir.path().join("files")
    }

    /// Count regular files under a directory, recursively.
    pub fn file_count(&self, dir: &Path) -> usize {
        fn walk(dir: &Path, count: &mut usize) {
            let Ok(entries) = std::fs::read_dir(dir) else {
                return;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    walk(&path, count);
                } else {
                    *count += 1;
                }
            }
        }
        let mut count = 0;
        walk(dir, &mut count);
        count
    }

    /// Total number of files anywhere in the spool (parts, sessions, ready).
    pub fn spool_file_count(&self) -> usize {
        self.file_count(&self.temp_dir.path().join("spool"))
    }
}

/// Builder for multipart/form-data request bodies.
#[allow(dead_code)]
pub struct MultipartBuilder {
    body: Vec<u8>,
}

#[allow(dead_code)]
impl MultipartBuilder {
    pub fn new() -> Self {
        Self { body: Vec::new() }
    }

    /// Append a plain text field.
    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.body
            .extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        self.body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
        );
        self.body.extend_from_slice(value.as_bytes());
        self.body.extend_from_slice(b"\r\n");
        self
    }

    /// Append a file field.
    pub fn file(mut self, name: &str, filename: &str, content_type: &str, data: &[u8]) -> Self {
        self.body
            .extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        self.body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n"
            )
            .as_bytes(),
        );
        self.body
            .extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    /// Finish the body and return it with its Content-Type header value.
    pub fn build(mut self) -> (String, Vec<u8>) {
        self.body
            .extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        (
            format!("multipart/form-data; boundary={BOUNDARY}"),
            self.body,
        )
    }
}

/// POST a multipart body to /v1/upload with optional chunk headers.
/// Returns the status and the first element of the JSON array response.
#[allow(dead_code)]
pub async fn send_upload(
    router: &axum::Router,
    headers: &[(&str, &str)],
    content_type: &str,
    body: Vec<u8>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/v1/upload")
        .header("Content-Type", content_type);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }

    let response = router
        .clone()
        .oneshot(builder.body(Body::from(body)).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);
    let first = json.get(0).cloned().unwrap_or(Value::Null);

    (status, first)
}

/// Send one chunk of a chunked upload.
#[allow(dead_code)]
pub async fn send_chunk(
    server: &TestServer,
    token: &str,
    file_name: &str,
    declared_size: u64,
    offset: Option<u64>,
    data: &[u8],
) -> (StatusCode, Value) {
    let (content_type, body) = MultipartBuilder::new()
        .text("SecurityID", token)
        .file("Uploads", "blob", "application/octet-stream", data)
        .build();

    let size = declared_size.to_string();
    let offset_value = offset.map(|o| o.to_string());
    let mut headers: Vec<(&str, &str)> = vec![
        ("X-File-Name", file_name),
        ("X-File-Size", size.as_str()),
        ("X-Requested-With", "XMLHttpRequest"),
    ];
    if let Some(ref o) = offset_value {
        headers.push(("X-File-Offset", o.as_str()));
    }

    send_upload(&server.router, &headers, &content_type, body).await
}
