//! HTTP server.
//!
//! Two endpoints: the post-receive hook the git server calls after every
//! accepted push, and a health check for liveness probes.
//!
//! - `POST /hooks/post-receive` - signed reference-update notification
//!   (returns 202 Accepted)
//! - `GET /health` - returns 200 if the server is running

use std::sync::Arc;

pub mod health;
pub mod hooks;
pub mod signature;

pub use health::health_handler;
pub use hooks::post_receive_handler;
pub use signature::{
    compute_signature, format_signature_header, parse_signature_header, verify_signature,
};

use crate::events::git::GitEventReporter;

/// Shared application state, passed to handlers via axum's `State`
/// extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Shared secret for HMAC-SHA256 hook signature verification.
    hook_secret: Vec<u8>,

    /// Publishes git reference events for accepted pushes.
    git_events: GitEventReporter,
}

impl AppState {
    pub fn new(hook_secret: impl Into<Vec<u8>>, git_events: GitEventReporter) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                hook_secret: hook_secret.into(),
                git_events,
            }),
        }
    }

    pub fn hook_secret(&self) -> &[u8] {
        &self.inner.hook_secret
    }

    pub fn git_events(&self) -> &GitEventReporter {
        &self.inner.git_events
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/hooks/post-receive", post(post_receive_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}
