//! Integration tests for the upload orchestrator.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{MultipartBuilder, TestServer, send_chunk, send_upload};
use serde_json::Value;
use tower::ServiceExt;

async fn get_json(router: &axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

/// Find the single persisted file under files/ and return its bytes.
fn read_persisted_file(server: &TestServer) -> Vec<u8> {
    fn find(dir: &std::path::Path, found: &mut Vec<std::path::PathBuf>) {
        for entry in std::fs::read_dir(dir).unwrap().flatten() {
            let path = entry.path();
            if path.is_dir() {
                find(&path, found);
            } else {
                found.push(path);
            }
        }
    }
    let mut found = Vec::new();
    find(&server.files_dir(), &mut found);
    assert_eq!(found.len(), 1, "expected exactly one persisted file");
    std::fs::read(&found[0]).unwrap()
}

#[tokio::test]
async fn scenario_a_two_chunks_reassemble_exactly() {
    let server = TestServer::new().await;
    let token = server.mint_token().await;

    // Chunk 1: 6 of 10 declared bytes.
    let (status, body) = send_chunk(&server, &token, "report.bin", 10, Some(0), b"abcdef").await;
    assert_eq!(status, StatusCode::OK);
    let progress = body.get("ok").expect("progress envelope");
    assert_eq!(progress["bytes_written"], 6);
    assert_eq!(progress["total_expected"], 10);

    // The accumulating artifact holds exactly the first chunk.
    assert_eq!(server.file_count(&server.spool_dir("sessions")), 1);

    // Chunk 2 completes the upload and hands off to persistence.
    let (status, body) = send_chunk(&server, &token, "report.bin", 10, Some(6), b"ghij").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "report.bin");
    assert_eq!(body["size"], 10);
    assert!(body["url"].as_str().unwrap().contains("report.bin"));

    // Byte-exact reassembly, session artifact gone.
    assert_eq!(read_persisted_file(&server), b"abcdefghij");
    assert_eq!(server.file_count(&server.spool_dir("sessions")), 0);
    assert_eq!(server.file_count(&server.spool_dir("ready")), 0);
}

#[tokio::test]
async fn scenario_b_whole_file_bypasses_sessions() {
    let server = TestServer::new().await;
    let token = server.mint_token().await;

    let payload = vec![42u8; 500];
    let (content_type, body) = MultipartBuilder::new()
        .text("SecurityID", &token)
        .text("filename", "photo.jpg")
        .file("Uploads", "photo.jpg", "image/jpeg", &payload)
        .build();

    let (status, attrs) = send_upload(&server.router, &[], &content_type, body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(attrs["name"], "photo.jpg");
    assert_eq!(attrs["size"], 500);
    assert_eq!(attrs["content_type"], "image/jpeg");

    assert_eq!(read_persisted_file(&server), payload);

    // No temp-artifact hashing step: nothing in the session area, no rows.
    assert_eq!(server.file_count(&server.spool_dir("sessions")), 0);
    let expired = server
        .sessions()
        .expired_sessions(time::OffsetDateTime::now_utc() + time::Duration::days(365))
        .await
        .unwrap();
    assert!(expired.is_empty(), "whole-file uploads create no sessions");
}

#[tokio::test]
async fn scenario_c_overshoot_is_an_error() {
    let server = TestServer::new().await;
    let token = server.mint_token().await;

    let (status, _) = send_chunk(&server, &token, "over.bin", 10, None, b"abcdef").await;
    assert_eq!(status, StatusCode::OK);

    // Second chunk pushes the artifact to 12 > 10 declared bytes.
    let (status, body) = send_chunk(&server, &token, "over.bin", 10, None, b"ghijkl").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "overshoot");

    // The corrupt artifact is gone and nothing was persisted.
    assert_eq!(server.file_count(&server.spool_dir("sessions")), 0);
    assert_eq!(server.file_count(&server.files_dir()), 0);

    // A clean retry starts from byte zero and succeeds.
    let (status, _) = send_chunk(&server, &token, "over.bin", 10, Some(0), b"abcdef").await;
    assert_eq!(status, StatusCode::OK);
    let (status, attrs) = send_chunk(&server, &token, "over.bin", 10, Some(6), b"ghij").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(attrs["size"], 10);
}

#[tokio::test]
async fn scenario_d_duplicate_chunk_with_offset_rejected() {
    let server = TestServer::new().await;
    let token = server.mint_token().await;

    let (status, _) = send_chunk(&server, &token, "dup.bin", 12, Some(0), b"abcdef").await;
    assert_eq!(status, StatusCode::OK);

    // Client retry re-sends the same chunk at the same offset.
    let (status, body) = send_chunk(&server, &token, "dup.bin", 12, Some(0), b"abcdef").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "offset_mismatch");
    let message = body["error"].as_str().unwrap();
    assert!(message.contains('6'), "message reports the artifact length");
    assert!(!message.contains('/'), "no paths in error payloads");

    // The artifact is unchanged; the upload continues at the right offset.
    let (status, attrs) = send_chunk(&server, &token, "dup.bin", 12, Some(6), b"ghijkl").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(attrs["size"], 12);
    assert_eq!(read_persisted_file(&server), b"abcdefghijkl");
}

#[tokio::test]
async fn legacy_retry_without_offset_corrupts_artifact() {
    // Clients that predate X-File-Offset keep the original wire contract,
    // including its duplicate-retry gap: the duplicate is appended and the
    // reassembled file is silently wrong. This test documents the gap.
    let server = TestServer::new().await;
    let token = server.mint_token().await;

    let (status, _) = send_chunk(&server, &token, "legacy.bin", 12, None, b"abcdef").await;
    assert_eq!(status, StatusCode::OK);

    let (status, attrs) = send_chunk(&server, &token, "legacy.bin", 12, None, b"abcdef").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(attrs["size"], 12);

    // Size matches the declaration but the content is the duplicated chunk.
    assert_eq!(read_persisted_file(&server), b"abcdefabcdef");
}

#[tokio::test]
async fn missing_form_token_rejected_with_zero_writes() {
    let server = TestServer::new().await;

    let (content_type, body) = MultipartBuilder::new()
        .file("Uploads", "blob", "application/octet-stream", b"payload")
        .build();
    let (status, error) = send_upload(
        &server.router,
        &[("X-File-Name", "a.bin"), ("X-File-Size", "7")],
        &content_type,
        body,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "invalid_form_token");
    assert_eq!(server.spool_file_count(), 0, "no filesystem writes");
    assert_eq!(server.file_count(&server.files_dir()), 0);
}

#[tokio::test]
async fn invalid_and_expired_tokens_rejected() {
    let server = TestServer::new().await;

    let (status, error) =
        send_chunk(&server, "wrong-token", "a.bin", 7, Some(0), b"payload").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "invalid_form_token");

    server.insert_token("stale-token", -10).await;
    let (status, error) = send_chunk(&server, "stale-token", "a.bin", 7, Some(0), b"payload").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "invalid_form_token");

    assert_eq!(server.spool_file_count(), 0);
}

#[tokio::test]
async fn upload_gate_rejects_before_any_io() {
    let server = TestServer::with_config(|config| {
        config.server.uploads_enabled = false;
    })
    .await;
    let token = server.mint_token().await;

    let (status, error) = send_chunk(&server, &token, "a.bin", 4, Some(0), b"data").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error["code"], "forbidden");
    assert_eq!(server.spool_file_count(), 0);

    let server = TestServer::with_config(|config| {
        config.server.read_only = true;
    })
    .await;
    let token = server.mint_token().await;
    let (status, _) = send_chunk(&server, &token, "a.bin", 4, Some(0), b"data").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(server.spool_file_count(), 0);
}

#[tokio::test]
async fn distinct_sessions_do_not_interfere() {
    let server = TestServer::new().await;
    let token = server.mint_token().await;

    // Interleave chunks of two uploads whose names differ.
    let (status, _) = send_chunk(&server, &token, "left.bin", 8, Some(0), b"LLLL").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send_chunk(&server, &token, "right.bin", 6, Some(0), b"RRR").await;
    assert_eq!(status, StatusCode::OK);
    let (status, left) = send_chunk(&server, &token, "left.bin", 8, Some(4), b"llll").await;
    assert_eq!(status, StatusCode::OK);
    let (status, right) = send_chunk(&server, &token, "right.bin", 6, Some(3), b"rrr").await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(left["size"], 8);
    assert_eq!(right["size"], 6);

    // Each persisted file holds exactly its own chunks.
    let mut contents: Vec<Vec<u8>> = Vec::new();
    fn find(dir: &std::path::Path, found: &mut Vec<std::path::PathBuf>) {
        for entry in std::fs::read_dir(dir).unwrap().flatten() {
            let path = entry.path();
            if path.is_dir() {
                find(&path, found);
            } else {
                found.push(path);
            }
        }
    }
    let mut found = Vec::new();
    find(&server.files_dir(), &mut found);
    for path in &found {
        contents.push(std::fs::read(path).unwrap());
    }
    contents.sort();
    assert_eq!(contents, vec![b"LLLLllll".to_vec(), b"RRRrrr".to_vec()]);
}

#[tokio::test]
async fn same_session_overlap_rejected_as_busy() {
    let server = TestServer::new().await;
    let token = server.mint_token().await;

    // Hold the session's lock as an in-flight request would.
    let key = hopper_core::SessionKey::derive(&token, "busy.bin");
    let guard = server.state.locks.try_acquire(&key.to_hex()).unwrap();

    let (status, error) = send_chunk(&server, &token, "busy.bin", 8, Some(0), b"data").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["code"], "busy");

    // The bounced request left no scratch or artifact behind.
    assert_eq!(server.spool_file_count(), 0);

    // Once the in-flight request finishes, the same chunk goes through.
    drop(guard);
    let (status, _) = send_chunk(&server, &token, "busy.bin", 8, Some(0), b"data").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn capabilities_reports_derived_chunk_size() {
    let server = TestServer::with_config(|config| {
        config.server.upload_limit = 1000;
        config.server.post_size_limit = 2000;
    })
    .await;

    let (status, body) = get_json(&server.router, "/v1/capabilities").await;
    assert_eq!(status, StatusCode::OK);
    // 0.9 x min(upload_limit, post_size_limit)
    assert_eq!(body["max_chunk_size"], 900);
}

#[tokio::test]
async fn minted_form_token_works_end_to_end() {
    let server = TestServer::new().await;

    let response = server
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/form-tokens")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let minted: Value = serde_json::from_slice(&body).unwrap();
    let token = minted["token"].as_str().unwrap();

    let (status, attrs) = send_chunk(&server, token, "minted.bin", 4, Some(0), b"data").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(attrs["size"], 4);
}

#[tokio::test]
async fn persistence_policy_rejection_cleans_up() {
    let server = TestServer::with_config(|config| {
        config.persist.allowed_extensions = vec!["png".to_string()];
    })
    .await;
    let token = server.mint_token().await;

    let (status, error) = send_chunk(&server, &token, "tool.exe", 4, Some(0), b"MZ\x00\x00").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(error["code"], "validation_failed");

    // The collaborator removed the finalized artifact; nothing orphaned.
    assert_eq!(server.file_count(&server.files_dir()), 0);
    assert_eq!(server.file_count(&server.spool_dir("ready")), 0);
}

#[tokio::test]
async fn redeclared_size_restarts_session() {
    let server = TestServer::new().await;
    let token = server.mint_token().await;

    let (status, _) = send_chunk(&server, &token, "resize.bin", 10, Some(0), b"abcdef").await;
    assert_eq!(status, StatusCode::OK);

    // The client starts over with a different declared size: the stale
    // artifact is discarded and accumulation restarts from byte zero.
    let (status, body) = send_chunk(&server, &token, "resize.bin", 20, Some(0), b"ABCDEF").await;
    assert_eq!(status, StatusCode::OK);
    let progress = body.get("ok").expect("progress envelope");
    assert_eq!(progress["bytes_written"], 6);
    assert_eq!(progress["total_expected"], 20);
}

#[tokio::test]
async fn mismatched_offset_on_first_chunk_creates_no_artifact() {
    let server = TestServer::new().await;
    let token = server.mint_token().await;

    let (status, error) = send_chunk(&server, &token, "fresh.bin", 10, Some(4), b"data").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["code"], "offset_mismatch");
    assert_eq!(server.file_count(&server.spool_dir("sessions")), 0);
}

#[tokio::test]
async fn request_without_file_part_rejected() {
    let server = TestServer::new().await;
    let token = server.mint_token().await;

    let (content_type, body) = MultipartBuilder::new()
        .text("SecurityID", &token)
        .build();
    let (status, error) = send_upload(&server.router, &[], &content_type, body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "bad_request");
}

#[tokio::test]
async fn whole_file_uses_part_filename_when_field_missing() {
    let server = TestServer::new().await;
    let token = server.mint_token().await;

    let (content_type, body) = MultipartBuilder::new()
        .text("SecurityID", &token)
        .file("Uploads", "from-part.txt", "text/plain", b"hello")
        .build();
    let (status, attrs) = send_upload(&server.router, &[], &content_type, body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(attrs["name"], "from-part.txt");
}

#[tokio::test]
async fn hostile_file_name_never_reaches_a_path() {
    let server = TestServer::new().await;
    let token = server.mint_token().await;

    // Traversal attempts hash into an opaque session key and a sanitized
    // display name; nothing escapes the spool or files area.
    let (status, _) = send_chunk(
        &server,
        &token,
        "../../etc/passwd",
        4,
        Some(0),
        b"r00t",
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let persisted = read_persisted_file(&server);
    assert_eq!(persisted, b"r00t");
    assert!(!server.files_dir().join("../../etc/passwd").exists());
}

#[tokio::test]
async fn health_and_metrics_endpoints() {
    let server = TestServer::new().await;

    let (status, body) = get_json(&server.router, "/v1/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let response = server
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let server = TestServer::with_config(|config| {
        config.server.metrics_enabled = false;
    })
    .await;
    let response = server
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
