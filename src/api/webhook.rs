//! Webhook handler for GitHub push and ping events

use axum::{
    body::Bytes,
    extract::State as AxumState,
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::{error, info, warn};

use crate::SharedState;
use crate::notification::Notification;

/// Authenticates the notification, filters it by branch and hands accepted
/// pushes to the build runner. The response never waits for the build.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let secret = state.config.secret().unwrap_or_default();
    let notification = match Notification::from_request(secret, &method, &headers, body.as_ref())
    {
        Ok(n) => n,
        Err(e) => {
            error!("request: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                format!("INVALID_PAYLOAD: {}\n", e),
            )
                .into_response();
        }
    };

    let repo = notification.repository.full_name.clone();

    if notification.is_ping() {
        info!(
            "request: {}: ping: {}",
            repo,
            notification.zen.as_deref().unwrap_or_default()
        );
        return (StatusCode::OK, "PONG\n").into_response();
    }

    let branch = notification.branch().to_string();
    if !state.config.is_branch_allowed(&branch) {
        warn!("request: {}: branch not allowed: {:?}", repo, branch);
        return (StatusCode::BAD_REQUEST, "BRANCH_NOT_ALLOWED\n").into_response();
    }

    // Deleted branches are acknowledged but not acted upon.
    if notification.deleted {
        info!("request: {}: branch deleted: {}", repo, branch);
        return StatusCode::OK.into_response();
    }

    info!(
        "request: {}: accepted push to {} at {}",
        repo, branch, notification.commit
    );
    // The runner keeps track of the task; the handle is not needed here.
    let _ = state.runner.spawn(notification);

    (StatusCode::ACCEPTED, "ACCEPTED\n").into_response()
}
