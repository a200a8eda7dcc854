//! Health, capability discovery, and form-token minting.

use crate::auth::mint_form_token;
use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use hopper_core::upload::{Capabilities, FormTokenResponse};
use serde_json::{Value, json};

/// GET /v1/health - Liveness probe (intentionally unauthenticated).
pub async fn health_check() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// GET /v1/capabilities - Limits for upload clients.
///
/// The advertised chunk size is the derived limit clients honor when
/// slicing files; the server enforces the underlying body limits itself.
pub async fn get_capabilities(State(state): State<AppState>) -> Json<Capabilities> {
    Json(Capabilities {
        max_chunk_size: state.config.server.max_chunk_size(),
    })
}

/// POST /v1/form-tokens - Mint an anti-forgery token.
///
/// Called by the form-rendering host when it serves an upload form; the
/// token value is embedded in the form and echoed back as `SecurityID`.
pub async fn create_form_token(
    State(state): State<AppState>,
) -> ApiResult<Json<FormTokenResponse>> {
    let response = mint_form_token(&state).await?;
    Ok(Json(response))
}
