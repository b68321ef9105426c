//! HTTP routes
//!
//! Handlers are thin: each one moves the blocking mailsync call onto the
//! blocking pool and maps the outcome to a status code.

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use log::error;
use mailsync::{Acknowledgement, NotificationReceiver, SubscriptionManager, SyncError, SyncResult};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub receiver: Arc<NotificationReceiver>,
    pub subscriptions: Arc<SubscriptionManager>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(receive_push))
        .route("/renew_gmail_push_permissions", post(renew_watch))
        .route("/revoke_gmail_push_permissions", post(revoke_watch))
        .route("/healthz", get(health))
        .with_state(state)
}

/// Run a blocking mailsync call, turning failures into error responses
async fn blocking<T, F>(f: F) -> Result<T, Response>
where
    F: FnOnce() -> SyncResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(error_response(&e)),
        Err(e) => {
            error!("Blocking task failed: {}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response())
        }
    }
}

/// Retryable failures ask the caller to try again (500); anything else is
/// the caller's fault
fn error_response(e: &SyncError) -> Response {
    error!("{}", e);
    let status = if e.is_retryable() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, e.to_string()).into_response()
}

/// Pub/Sub push endpoint
async fn receive_push(State(state): State<AppState>, body: Bytes) -> Response {
    let receiver = Arc::clone(&state.receiver);
    match blocking(move || receiver.handle(&body)).await {
        Ok(Acknowledgement::Rejected(reason)) => (StatusCode::BAD_REQUEST, reason).into_response(),
        Ok(Acknowledgement::Processed(_) | Acknowledgement::Ignored) => {
            StatusCode::NO_CONTENT.into_response()
        }
        Err(response) => response,
    }
}

async fn renew_watch(State(state): State<AppState>) -> Response {
    let subscriptions = Arc::clone(&state.subscriptions);
    let topic = subscriptions.topic_name();
    let identity = subscriptions.identity().to_string();

    match blocking(move || subscriptions.activate()).await {
        Ok(registration) => {
            let expires = registration
                .expires_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string());
            (
                StatusCode::OK,
                format!(
                    "Gmail push notifications for {} are published to {} until {} (history {})",
                    identity, topic, expires, registration.history_id
                ),
            )
                .into_response()
        }
        Err(response) => response,
    }
}

#[derive(Debug, Default, Deserialize)]
struct RevokeParams {
    #[serde(default)]
    forget_cursor: bool,
}

async fn revoke_watch(
    State(state): State<AppState>,
    Query(params): Query<RevokeParams>,
) -> Response {
    let subscriptions = Arc::clone(&state.subscriptions);
    let identity = subscriptions.identity().to_string();
    let forget = params.forget_cursor;

    let result = blocking(move || {
        if forget {
            subscriptions.unsubscribe()
        } else {
            subscriptions.deactivate()
        }
    })
    .await;

    match result {
        Ok(()) if forget => (
            StatusCode::OK,
            format!("Stopped Gmail push notifications for {} and cleared its cursor", identity),
        )
            .into_response(),
        Ok(()) => (
            StatusCode::OK,
            format!("Stopped Gmail push notifications for {}", identity),
        )
            .into_response(),
        Err(response) => response,
    }
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
