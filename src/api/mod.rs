//! HTTP surface: a single webhook endpoint answering on every path.

pub mod webhook;

use axum::{Router, extract::DefaultBodyLimit, routing::any};

use crate::SharedState;
pub use webhook::handle_webhook;

/// GitHub caps webhook payloads at 25 MB.
pub const MAX_PAYLOAD_BYTES: usize = 25 * 1024 * 1024;

pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/", any(handle_webhook))
        .fallback(handle_webhook)
        .layer(DefaultBodyLimit::max(MAX_PAYLOAD_BYTES))
        .with_state(state)
}
