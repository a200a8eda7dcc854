//! The upload orchestrator.
//!
//! One handler drives the whole request-level state machine: entry guard,
//! chunked-vs-whole-file branch, append, completion check, finalization,
//! and the handoff to persistence.

use crate::auth::{check_upload_gate, verify_form_token};
use crate::error::{ApiError, ApiResult};
use crate::metrics::{
    BUSY_REJECTIONS, BYTES_APPENDED, CHUNK_APPEND_DURATION, CHUNKS_APPENDED, FILES_PERSISTED,
    SESSIONS_FINALIZED, SESSIONS_OVERSHOT, SESSIONS_STARTED, record_upload_error,
};
use crate::persist::PersistCandidate;
use crate::state::AppState;
use axum::extract::multipart::Field;
use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use hopper_core::session::{Completion, SessionKey, SessionState, UploadSession};
use hopper_core::upload::ProgressInfo;
use hopper_core::MISSING_TOKEN_SENTINEL;
use hopper_metadata::models::UploadSessionRow;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;
use time::OffsetDateTime;

/// Form field carrying the anti-forgery token.
const SECURITY_TOKEN_FIELD: &str = "SecurityID";

/// Optional form field naming the file in non-chunked mode.
const FILENAME_FIELD: &str = "filename";

/// Chunk-protocol metadata carried out-of-band in request headers.
#[derive(Debug)]
struct ChunkMeta {
    /// Original file name (`X-File-Name`).
    file_name: String,
    /// Declared total upload size (`X-File-Size`).
    declared_size: u64,
    /// Advisory content type (`X-File-Type`).
    content_type: Option<String>,
    /// Byte offset this chunk starts at (`X-File-Offset`).
    /// Absent for legacy clients; present offsets are validated strictly.
    offset: Option<u64>,
}

impl ChunkMeta {
    /// Parse chunk headers. Returns None when the request is not chunked
    /// (no `X-File-Name` header).
    fn from_headers(headers: &HeaderMap) -> ApiResult<Option<Self>> {
        let Some(name_value) = headers.get("x-file-name") else {
            return Ok(None);
        };
        let file_name = name_value
            .to_str()
            .map_err(|_| ApiError::BadRequest("X-File-Name is not valid UTF-8".to_string()))?
            .to_string();
        if file_name.is_empty() {
            return Err(ApiError::BadRequest("X-File-Name is empty".to_string()));
        }

        let declared_size: u64 = headers
            .get("x-file-size")
            .ok_or_else(|| {
                ApiError::BadRequest("X-File-Size is required for chunked uploads".to_string())
            })?
            .to_str()
            .map_err(|_| ApiError::BadRequest("X-File-Size is not valid UTF-8".to_string()))?
            .parse()
            .map_err(|_| ApiError::BadRequest("X-File-Size is not a valid size".to_string()))?;
        // Sizes above i64 cannot be stored or compared safely.
        if declared_size > i64::MAX as u64 {
            return Err(ApiError::BadRequest(format!(
                "X-File-Size {declared_size} exceeds maximum supported size"
            )));
        }

        let content_type = headers
            .get("x-file-type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let offset = match headers.get("x-file-offset") {
            None => None,
            Some(value) => Some(
                value
                    .to_str()
                    .map_err(|_| {
                        ApiError::BadRequest("X-File-Offset is not valid UTF-8".to_string())
                    })?
                    .parse::<u64>()
                    .map_err(|_| {
                        ApiError::BadRequest("X-File-Offset is not a valid offset".to_string())
                    })?,
            ),
        };

        Ok(Some(Self {
            file_name,
            declared_size,
            content_type,
            offset,
        }))
    }
}

/// The single file part captured into a scratch file.
struct CapturedPart {
    scratch_path: PathBuf,
    size: u64,
    /// Name from the part's Content-Disposition, if any.
    part_file_name: Option<String>,
    /// Content type of the part itself.
    part_content_type: Option<String>,
}

/// Form fields and file part extracted from the multipart body.
struct ParsedForm {
    security_token: Option<String>,
    filename_field: Option<String>,
    part: CapturedPart,
}

/// POST /v1/upload - Receive one chunk or one whole file.
#[tracing::instrument(skip(state, headers, multipart))]
pub async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> ApiResult<Response> {
    match upload_inner(state, headers, multipart).await {
        Ok(response) => Ok(response),
        Err(e) => {
            record_upload_error(e.code());
            Err(e)
        }
    }
}

async fn upload_inner(
    state: AppState,
    headers: HeaderMap,
    multipart: Multipart,
) -> ApiResult<Response> {
    // Gate before reading any body bytes.
    check_upload_gate(&state)?;

    let chunk_meta = ChunkMeta::from_headers(&headers)?;
    let form = read_form(&state, multipart).await?;

    match chunk_meta {
        Some(meta) => handle_chunk(&state, meta, &form).await,
        None => handle_whole_file(&state, form).await,
    }
}

/// Walk the multipart fields in order, capturing the token and the single
/// file part.
///
/// The anti-forgery check runs when the file part is reached and before a
/// single byte of it is consumed, so a rejected request performs zero
/// filesystem writes. Forms must therefore place `SecurityID` before the
/// file part, which is how browsers serialize the rendered form anyway.
async fn read_form(state: &AppState, mut multipart: Multipart) -> ApiResult<ParsedForm> {
    let mut security_token: Option<String> = None;
    let mut filename_field: Option<String> = None;
    let mut part: Option<CapturedPart> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().map(|s| s.to_string());
        let is_file = field.file_name().is_some();
        match name.as_deref() {
            Some(SECURITY_TOKEN_FIELD) if !is_file => {
                security_token = Some(read_text_field(field).await?);
            }
            Some(FILENAME_FIELD) if !is_file => {
                filename_field = Some(read_text_field(field).await?);
            }
            _ if is_file => {
                verify_form_token(state, security_token.as_deref()).await?;
                if part.is_some() {
                    return Err(ApiError::BadRequest(
                        "request carries more than one file part".to_string(),
                    ));
                }
                part = Some(capture_file_part(state, field).await?);
            }
            // Unknown text fields are drained and ignored.
            _ => {
                let _ = field.bytes().await.map_err(|e| {
                    ApiError::BadRequest(format!("malformed multipart body: {e}"))
                })?;
            }
        }
    }

    let part = part
        .ok_or_else(|| ApiError::BadRequest("request carries no file part".to_string()))?;

    Ok(ParsedForm {
        security_token,
        filename_field,
        part,
    })
}

async fn read_text_field(field: Field<'_>) -> ApiResult<String> {
    field
        .text()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed form field: {e}")))
}

/// Stream the file part into a scratch file in bounded buffers.
async fn capture_file_part(state: &AppState, mut field: Field<'_>) -> ApiResult<CapturedPart> {
    let part_file_name = field.file_name().map(|s| s.to_string());
    let part_content_type = field.content_type().map(|s| s.to_string());
    let upload_limit = state.config.server.upload_limit;

    let mut scratch = state.spool.create_part().await?;
    loop {
        match field.chunk().await {
            Ok(Some(bytes)) => {
                if scratch.len() + bytes.len() as u64 > upload_limit {
                    let _ = scratch.abort().await;
                    return Err(ApiError::BadRequest(format!(
                        "file part exceeds upload limit of {upload_limit} bytes"
                    )));
                }
                scratch.write(&bytes).await?;
            }
            Ok(None) => break,
            // Interrupted transfer: the artifact was never touched, a retry
            // can resume from the last appended chunk.
            Err(e) => {
                let _ = scratch.abort().await;
                return Err(ApiError::BadRequest(format!(
                    "file part transfer interrupted: {e}"
                )));
            }
        }
    }

    let (scratch_path, size) = scratch.finish().await?;
    Ok(CapturedPart {
        scratch_path,
        size,
        part_file_name,
        part_content_type,
    })
}

/// Chunked path: derive -> serialize -> append -> check -> finalize.
async fn handle_chunk(state: &AppState, meta: ChunkMeta, form: &ParsedForm) -> ApiResult<Response> {
    let start_time = Instant::now();

    // Identity derivation tolerates a missing token (the token check has
    // already enforced presence); the sentinel keeps derivation total.
    let identity_token = form
        .security_token
        .as_deref()
        .unwrap_or(MISSING_TOKEN_SENTINEL);
    let key = SessionKey::derive(identity_token, &meta.file_name);
    let key_hex = key.to_hex();
    let spool_key = key.to_spool_key();

    // One chunk in flight per session; overlapping requests bounce.
    let Some(_guard) = state.locks.try_acquire(&key_hex) else {
        BUSY_REJECTIONS.inc();
        let _ = state.spool.discard_part(&form.part.scratch_path).await;
        return Err(ApiError::Busy);
    };

    let session = resolve_session(state, &key, &key_hex, &spool_key, &meta).await?;

    let outcome = match state
        .spool
        .append_chunk(&spool_key, &form.part.scratch_path, meta.offset)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            let _ = state.spool.discard_part(&form.part.scratch_path).await;
            return Err(e.into());
        }
    };
    let _ = state.spool.discard_part(&form.part.scratch_path).await;

    CHUNKS_APPENDED.inc();
    BYTES_APPENDED.inc_by(outcome.appended);
    CHUNK_APPEND_DURATION.observe(start_time.elapsed().as_secs_f64());

    let now = OffsetDateTime::now_utc();
    match Completion::check(outcome.total, meta.declared_size) {
        Completion::Incomplete => {
            state
                .sessions
                .record_progress(&key_hex, outcome.total as i64, now)
                .await?;

            tracing::debug!(
                session = %key,
                bytes_written = outcome.total,
                total_expected = meta.declared_size,
                "chunk appended, awaiting more"
            );

            field_array_response(&serde_json::json!({
                "ok": ProgressInfo {
                    bytes_written: outcome.total,
                    total_expected: meta.declared_size,
                },
            }))
        }
        Completion::Complete => {
            let ready_path = state.spool.promote(&spool_key).await?;
            state
                .sessions
                .record_progress(&key_hex, outcome.total as i64, now)
                .await?;
            state
                .sessions
                .set_state(&key_hex, SessionState::Finalized.as_str(), now)
                .await?;
            SESSIONS_FINALIZED.inc();

            tracing::info!(
                session = %key,
                size = outcome.total,
                "upload complete, handing to persistence"
            );

            let attributes = state
                .persister
                .persist(PersistCandidate {
                    artifact_path: ready_path,
                    file_name: session.file_name,
                    size: outcome.total,
                    content_type: meta.content_type,
                })
                .await?;
            FILES_PERSISTED.inc();

            field_array_response(&attributes)
        }
        Completion::Overshot => {
            SESSIONS_OVERSHOT.inc();
            tracing::warn!(
                session = %key,
                artifact_len = outcome.total,
                declared_size = meta.declared_size,
                "artifact exceeds declared size, failing session"
            );

            // The artifact can never become the declared file; remove it so
            // a retry restarts from byte zero.
            let _ = state.spool.remove_artifact(&spool_key).await;
            state
                .sessions
                .set_state(&key_hex, SessionState::Failed.as_str(), now)
                .await?;

            Err(ApiError::Overshoot {
                artifact_len: outcome.total,
                declared_size: meta.declared_size,
            })
        }
    }
}

/// Load the open session for this key, or start a fresh one.
///
/// A leftover row (finalized, failed, expired, or declared differently) is
/// replaced together with any stale artifact, so the new upload starts from
/// byte zero.
async fn resolve_session(
    state: &AppState,
    key: &SessionKey,
    key_hex: &str,
    spool_key: &str,
    meta: &ChunkMeta,
) -> ApiResult<UploadSession> {
    let now = OffsetDateTime::now_utc();

    if let Some(row) = state.sessions.get_session(key_hex).await? {
        let resumable = row.state == SessionState::Open.as_str()
            && row.expires_at >= now
            && row.declared_size == meta.declared_size as i64;
        if resumable {
            return Ok(UploadSession {
                key: *key,
                file_name: row.file_name,
                declared_size: row.declared_size as u64,
                bytes_written: row.bytes_written as u64,
                state: SessionState::Open,
                created_at: row.created_at,
                updated_at: row.updated_at,
                expires_at: row.expires_at,
            });
        }

        tracing::info!(
            session = %key,
            state = %row.state,
            "replacing stale session"
        );
        match state.spool.remove_artifact(spool_key).await {
            Ok(()) => {}
            Err(hopper_storage::StorageError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        state.sessions.delete_session(key_hex).await?;
    }

    let session = UploadSession::new(
        *key,
        meta.file_name.clone(),
        meta.declared_size,
        state.config.server.session_timeout(),
    );
    state
        .sessions
        .create_session(&UploadSessionRow {
            session_key: key_hex.to_string(),
            file_name: session.file_name.clone(),
            declared_size: session.declared_size as i64,
            bytes_written: 0,
            state: session.state.as_str().to_string(),
            created_at: session.created_at,
            updated_at: session.updated_at,
            expires_at: session.expires_at,
        })
        .await?;
    SESSIONS_STARTED.inc();

    tracing::info!(session = %key, declared_size = meta.declared_size, "session started");
    Ok(session)
}

/// Whole-file path: the scratch part is already the complete file.
/// No session key, no hashing, no temp artifact.
async fn handle_whole_file(state: &AppState, form: ParsedForm) -> ApiResult<Response> {
    let file_name = form
        .filename_field
        .or(form.part.part_file_name)
        .unwrap_or_else(|| "file".to_string());

    tracing::info!(size = form.part.size, "whole-file upload, handing to persistence");

    let attributes = state
        .persister
        .persist(PersistCandidate {
            artifact_path: form.part.scratch_path,
            file_name,
            size: form.part.size,
            content_type: form.part.part_content_type,
        })
        .await?;
    FILES_PERSISTED.inc();

    field_array_response(&attributes)
}

/// Serialize a value as the upload field's one-element JSON array, served
/// as text/plain (the inherited wire contract).
fn field_array_response<T: Serialize>(value: &T) -> ApiResult<Response> {
    let body = serde_json::to_string(&[value])
        .map_err(|e| ApiError::Internal(format!("response serialization failed: {e}")))?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain")],
        body,
    )
        .into_response())
}
