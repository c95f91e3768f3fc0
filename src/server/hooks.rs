//! Post-receive hook endpoint handler.
//!
//! The git server calls this endpoint synchronously after every accepted
//! push. The handler validates the signature, parses the reference updates,
//! publishes the corresponding git events, and returns 202 Accepted. All
//! pull request processing happens asynchronously in the bus consumers.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use super::signature::verify_signature;
use super::AppState;
use crate::types::{PrincipalId, RefUpdate, RepoId};

/// Header carrying the HMAC-SHA256 signature of the body.
const HEADER_SIGNATURE: &str = "x-hook-signature-256";

/// Payload of one post-receive invocation.
#[derive(Debug, Deserialize)]
pub struct PostReceiveBody {
    pub repo_id: RepoId,
    pub principal_id: PrincipalId,
    pub ref_updates: Vec<RefUpdate>,
}

/// Errors that can occur while processing a hook call.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl IntoResponse for HookError {
    fn into_response(self) -> Response {
        let status = match &self {
            HookError::MissingHeader(_) => StatusCode::BAD_REQUEST,
            HookError::InvalidSignature => StatusCode::UNAUTHORIZED,
            HookError::InvalidJson(_) => StatusCode::BAD_REQUEST,
        };
        (status, self.to_string()).into_response()
    }
}

/// Post-receive handler.
///
/// - 202 Accepted: events published (the push itself has already committed,
///   so this endpoint never blocks or fails it)
/// - 400 Bad Request: missing header or invalid JSON
/// - 401 Unauthorized: invalid signature
pub async fn post_receive_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), HookError> {
    let signature_header = headers
        .get(HEADER_SIGNATURE)
        .and_then(|value| value.to_str().ok())
        .ok_or(HookError::MissingHeader(HEADER_SIGNATURE))?;

    // Verify before any parsing.
    if !verify_signature(&body, signature_header, app_state.hook_secret()) {
        return Err(HookError::InvalidSignature);
    }

    let payload: PostReceiveBody = serde_json::from_slice(&body)?;
    debug!(
        repo = %payload.repo_id,
        updates = payload.ref_updates.len(),
        "received post-receive hook"
    );

    app_state.git_events().report_ref_updates(
        payload.repo_id,
        payload.principal_id,
        &payload.ref_updates,
    );

    Ok((StatusCode::ACCEPTED, "Accepted"))
}
