//! Session store trait and SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::{FormTokenRow, UploadSessionRow};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

/// Control-plane store for sessions and form tokens.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a new upload session.
    async fn create_session(&self, session: &UploadSessionRow) -> MetadataResult<()>;

    /// Get an upload session by key.
    async fn get_session(&self, session_key: &str) -> MetadataResult<Option<UploadSessionRow>>;

    /// Record append progress for a session.
    async fn record_progress(
        &self,
        session_key: &str,
        bytes_written: i64,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Transition a session's state.
    async fn set_state(
        &self,
        session_key: &str,
        state: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()>;

    /// Delete a session record.
    async fn delete_session(&self, session_key: &str) -> MetadataResult<()>;

    /// List sessions whose expiry passed before `now`.
    async fn expired_sessions(
        &self,
        now: OffsetDateTime,
    ) -> MetadataResult<Vec<UploadSessionRow>>;

    /// Store a minted form token (hash only).
    async fn create_form_token(&self, token: &FormTokenRow) -> MetadataResult<()>;

    /// Look up a form token by hash.
    async fn get_form_token(&self, token_hash: &str) -> MetadataResult<Option<FormTokenRow>>;

    /// Delete form tokens that expired before `now`. Returns the count removed.
    async fn purge_expired_form_tokens(&self, now: OffsetDateTime) -> MetadataResult<u64>;

    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based session store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection avoids
            // persistent "database is locked" failures under axum concurrency.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn create_session(&self, session: &UploadSessionRow) -> MetadataResult<()> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO upload_sessions (
                session_key, file_name, declared_size, bytes_written,
                state, created_at, updated_at, expires_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.session_key)
        .bind(&session.file_name)
        .bind(session.declared_size)
        .bind(session.bytes_written)
        .bind(&session.state)
        .bind(session.created_at)
        .bind(session.updated_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::AlreadyExists(format!(
                "session {} already exists",
                session.session_key
            )));
        }
        Ok(())
    }

    async fn get_session(&self, session_key: &str) -> MetadataResult<Option<UploadSessionRow>> {
        let row = sqlx::query_as::<_, UploadSessionRow>(
            "SELECT * FROM upload_sessions WHERE session_key = ?",
        )
        .bind(session_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn record_progress(
        &self,
        session_key: &str,
        bytes_written: i64,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()> {
        let result = sqlx::query(
            "UPDATE upload_sessions SET bytes_written = ?, updated_at = ? WHERE session_key = ?",
        )
        .bind(bytes_written)
        .bind(updated_at)
        .bind(session_key)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(format!(
                "session {session_key} not found"
            )));
        }
        Ok(())
    }

    async fn set_state(
        &self,
        session_key: &str,
        state: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<()> {
        let result = sqlx::query(
            "UPDATE upload_sessions SET state = ?, updated_at = ? WHERE session_key = ?",
        )
        .bind(state)
        .bind(updated_at)
        .bind(session_key)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MetadataError::NotFound(format!(
                "session {session_key} not found"
            )));
        }
        Ok(())
    }

    async fn delete_session(&self, session_key: &str) -> MetadataResult<()> {
        sqlx::query("DELETE FROM upload_sessions WHERE session_key = ?")
            .bind(session_key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn expired_sessions(
        &self,
        now: OffsetDateTime,
    ) -> MetadataResult<Vec<UploadSessionRow>> {
        let rows = sqlx::query_as::<_, UploadSessionRow>(
            "SELECT * FROM upload_sessions WHERE expires_at < ? ORDER BY expires_at",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn create_form_token(&self, token: &FormTokenRow) -> MetadataResult<()> {
        sqlx::query(
            "INSERT INTO form_tokens (token_hash, created_at, expires_at) VALUES (?, ?, ?)",
        )
        .bind(&token.token_hash)
        .bind(token.created_at)
        .bind(token.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_form_token(&self, token_hash: &str) -> MetadataResult<Option<FormTokenRow>> {
        let row =
            sqlx::query_as::<_, FormTokenRow>("SELECT * FROM form_tokens WHERE token_hash = ?")
                .bind(token_hash)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    async fn purge_expired_form_tokens(&self, now: OffsetDateTime) -> MetadataResult<u64> {
        let result = sqlx::query("DELETE FROM form_tokens WHERE expires_at < ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS upload_sessions (
    session_key TEXT PRIMARY KEY,
    file_name TEXT NOT NULL,
    declared_size INTEGER NOT NULL,
    bytes_written INTEGER NOT NULL DEFAULT 0,
    state TEXT NOT NULL DEFAULT 'open',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_upload_sessions_expiry ON upload_sessions(expires_at);

CREATE TABLE IF NOT EXISTS form_tokens (
    token_hash TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_form_tokens_expiry ON form_tokens(expires_at);
"#;
