use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::routing::{get, post};
use nutribot_channels::telegram::Update;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::api;
use crate::state::{GOOGLE_CALLBACK_PATH, SharedState};

/// Header Telegram uses to echo the secret given to `setWebhook`.
pub const WEBHOOK_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

const MAX_BODY_BYTES: usize = 20 * 1024 * 1024;

/// Build the main application router with all routes.
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/webhook", post(telegram_webhook))
        .route("/agent-answer", post(api::agent_answer))
        .route("/agent-answer/history", get(api::agent_history))
        .route("/api/user/generate-link-code", post(api::generate_link_code))
        .route("/api/user/link-status", get(api::link_status))
        .route("/api/user/unlink", post(api::unlink))
        .route("/api/user/delete", post(api::delete_user))
        .route("/auth/google/authorize", get(api::google_authorize))
        .route(GOOGLE_CALLBACK_PATH, get(api::google_callback))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// POST /webhook: one Telegram update.
///
/// Apart from a secret mismatch this always acknowledges, so Telegram never
/// redelivers an update whose processing failed.
async fn telegram_webhook(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, axum::Json<serde_json::Value>) {
    if let Some(expected) = state
        .config
        .telegram
        .webhook_secret
        .as_deref()
        .filter(|s| !s.is_empty())
    {
        let provided = headers
            .get(WEBHOOK_SECRET_HEADER)
            .and_then(|v| v.to_str().ok());
        if provided != Some(expected) {
            warn!("rejecting webhook call with missing or wrong secret token");
            return (
                StatusCode::FORBIDDEN,
                axum::Json(serde_json::json!({ "ok": false })),
            );
        }
    }

    match serde_json::from_slice::<Update>(&body) {
        Ok(update) => {
            let redirect_uri = state.redirect_uri(&headers);
            let task_state = Arc::clone(&state);
            // Run detached so a dropped webhook connection cannot cancel a
            // turn halfway; the response still waits for it to finish.
            let task = tokio::spawn(async move {
                task_state
                    .ingest
                    .ingest(update, redirect_uri.as_deref())
                    .await;
            });
            if let Err(e) = task.await {
                error!("webhook processing task failed: {e}");
            }
        }
        Err(e) => warn!("ignoring malformed webhook payload: {e}"),
    }

    (
        StatusCode::OK,
        axum::Json(serde_json::json!({ "ok": true })),
    )
}
