//! Entry guard: upload gate and anti-forgery form tokens.
//!
//! Both checks run before any filesystem side effect. The gate answers
//! "may anyone upload right now"; the form token answers "did this request
//! come from a form we rendered". Only the SHA-256 hash of a token is ever
//! stored.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use hopper_core::upload::FormTokenResponse;
use hopper_metadata::models::FormTokenRow;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;

/// Hash a raw token for storage lookup.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let result = hasher.finalize();
    result.iter().map(|b| format!("{b:02x}")).collect()
}

/// Reject the request if uploads are disabled or the server is read-only.
pub fn check_upload_gate(state: &AppState) -> ApiResult<()> {
    let server = &state.config.server;
    if !server.uploads_enabled {
        return Err(ApiError::Forbidden("uploads are disabled".to_string()));
    }
    if server.read_only {
        return Err(ApiError::Forbidden("server is read-only".to_string()));
    }
    Ok(())
}

/// Verify the anti-forgery token supplied with an upload request.
///
/// A missing token is a hard failure here; the `"none"` sentinel exists only
/// for identity derivation.
pub async fn verify_form_token(state: &AppState, supplied: Option<&str>) -> ApiResult<()> {
    let Some(token) = supplied.filter(|t| !t.is_empty()) else {
        return Err(ApiError::InvalidFormToken);
    };

    let row = state
        .sessions
        .get_form_token(&hash_token(token))
        .await?
        .ok_or(ApiError::InvalidFormToken)?;

    if row.expires_at < OffsetDateTime::now_utc() {
        return Err(ApiError::InvalidFormToken);
    }

    Ok(())
}

/// Mint a new form token for the form-rendering host.
pub async fn mint_form_token(state: &AppState) -> ApiResult<FormTokenResponse> {
    let token = Uuid::new_v4().to_string();
    let now = OffsetDateTime::now_utc();
    let expires_at = now + state.config.server.form_token_ttl();

    state
        .sessions
        .create_form_token(&FormTokenRow {
            token_hash: hash_token(&token),
            created_at: now,
            expires_at,
        })
        .await?;

    let expires_at = expires_at
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|e| ApiError::Internal(format!("failed to format expires_at: {e}")))?;

    Ok(FormTokenResponse { token, expires_at })
}
