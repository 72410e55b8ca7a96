//! HTTP handlers for web clients: conversational turns, history, account
//! linking and the Google OAuth round trip.

use axum::Json;
use axum::extract::{Multipart, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use chrono::{DateTime, Utc};
use nutribot_channels::{ExternalTurnRequest, InboundEvent, general_chat_id, normalize};
use nutribot_common::IdentityKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::orchestrator::TurnRoute;
use crate::state::SharedState;

const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 200;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl From<nutribot_common::Error> for ApiError {
    fn from(err: nutribot_common::Error) -> Self {
        match err {
            nutribot_common::Error::Validation(message) => Self::BadRequest(message),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(message) => {
                error!("request failed: {message}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let message = match &self {
            Self::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        };
        (status, Json(serde_json::json!({ "detail": message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ── conversation ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct AgentAnswerResponse {
    pub response_text: String,
    pub user_id: Option<i64>,
    pub chat_id: Option<i64>,
    pub external_chat_id: String,
    pub bot_message_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

/// POST /agent-answer: run one conversational turn for a web user.
pub async fn agent_answer(
    State(state): State<SharedState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<AgentAnswerResponse> {
    let mut request = ExternalTurnRequest::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "images" || name == "images[]" {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(format!("failed to read image: {e}")))?;
            request.images.push(bytes.to_vec());
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| ApiError::BadRequest(format!("failed to read field {name}: {e}")))?;
        match name.as_str() {
            "user_id" => request.external_user_id = value,
            "chat_id" => request.external_chat_id = Some(value),
            "username" => request.username = Some(value),
            "name" => request.name = Some(value),
            "email" => request.email = Some(value),
            "message_text" => request.message_text = Some(value),
            other => warn!(field = other, "ignoring unknown form field"),
        }
    }

    let turn = normalize(InboundEvent::External(request))?;
    let redirect_uri = state.redirect_uri(&headers);
    let outcome = state
        .orchestrator
        .handle_turn(turn, redirect_uri.as_deref())
        .await;

    match outcome.route {
        TurnRoute::Failed => {
            return Err(ApiError::Internal(format!(
                "turn in chat {} failed",
                outcome.external_chat_id
            )));
        }
        TurnRoute::Rejected => return Err(ApiError::BadRequest(outcome.reply)),
        _ => {}
    }

    Ok(Json(AgentAnswerResponse {
        response_text: outcome.reply,
        user_id: outcome.user_id,
        chat_id: outcome.chat_id,
        external_chat_id: outcome.external_chat_id,
        bot_message_id: outcome.assistant_message_id,
        timestamp: outcome.timestamp,
    }))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub user_id: String,
    pub chat_id: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct HistoryMessage {
    pub id: i64,
    pub role: &'static str,
    pub content_type: &'static str,
    pub text: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub external_chat_id: String,
    pub messages: Vec<HistoryMessage>,
}

/// GET /agent-answer/history: recent messages of a web user's chat, oldest first.
pub async fn agent_history(
    State(state): State<SharedState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<HistoryResponse> {
    let user_id = query.user_id.trim();
    if user_id.is_empty() {
        return Err(ApiError::BadRequest("user_id is required".into()));
    }
    let external_chat_id = query
        .chat_id
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| general_chat_id(user_id));
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    let store = state.store.lock().await;
    let Some(user) = store.find_user_by_key(&IdentityKey::Web(user_id.to_string()))? else {
        return Err(ApiError::NotFound(format!("unknown user {user_id}")));
    };

    let messages = match store.find_chat(&external_chat_id)? {
        Some(chat) if chat.owner_user_id == Some(user.id) => store
            .recent_messages(chat.id, limit)?
            .into_iter()
            .map(|m| HistoryMessage {
                id: m.id,
                role: m.role.as_str(),
                content_type: m.content_type.as_str(),
                text: m.text,
                created_at: m.created_at,
            })
            .collect(),
        Some(_) => return Err(ApiError::NotFound(format!("unknown chat {external_chat_id}"))),
        None => Vec::new(),
    };

    Ok(Json(HistoryResponse {
        external_chat_id,
        messages,
    }))
}

// ── account linking ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct GenerateLinkCodeRequest {
    pub web_user_id: String,
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LinkCodeResponse {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

/// POST /api/user/generate-link-code
pub async fn generate_link_code(
    State(state): State<SharedState>,
    Json(body): Json<GenerateLinkCodeRequest>,
) -> ApiResult<LinkCodeResponse> {
    let ttl = chrono::Duration::minutes(state.config.conversation.linking_code_ttl_minutes);
    let code = state.store.lock().await.issue_linking_code(
        body.web_user_id.trim(),
        body.email.as_deref().map(str::trim),
        ttl,
    )?;
    info!(web_user_id = %code.web_user_id, "issued linking code");
    Ok(Json(LinkCodeResponse {
        code: code.code,
        expires_at: code.expires_at,
    }))
}

#[derive(Debug, Deserialize)]
pub struct WebUserQuery {
    pub web_user_id: String,
}

#[derive(Debug, Serialize)]
pub struct LinkStatusResponse {
    pub linked: bool,
    pub telegram_user_id: Option<String>,
}

/// GET /api/user/link-status
pub async fn link_status(
    State(state): State<SharedState>,
    Query(query): Query<WebUserQuery>,
) -> ApiResult<LinkStatusResponse> {
    let status = state.store.lock().await.link_status(query.web_user_id.trim())?;
    Ok(Json(LinkStatusResponse {
        linked: status.linked,
        telegram_user_id: status.telegram_user_id,
    }))
}

/// POST /api/user/unlink
pub async fn unlink(
    State(state): State<SharedState>,
    Json(body): Json<WebUserQuery>,
) -> ApiResult<serde_json::Value> {
    let unlinked = state
        .store
        .lock()
        .await
        .unlink_telegram(body.web_user_id.trim())?;
    if unlinked {
        info!(web_user_id = %body.web_user_id, "unlinked Telegram account");
    }
    Ok(Json(serde_json::json!({ "success": unlinked })))
}

/// POST /api/user/delete: remove a web user and everything they own.
pub async fn delete_user(
    State(state): State<SharedState>,
    Json(body): Json<WebUserQuery>,
) -> ApiResult<serde_json::Value> {
    let store = state.store.lock().await;
    let key = IdentityKey::Web(body.web_user_id.trim().to_string());
    let deleted = match store.find_user_by_key(&key)? {
        Some(user) => store.delete_user(user.id)?,
        None => false,
    };
    if deleted {
        info!(web_user_id = %body.web_user_id, "deleted user");
    }
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

// ── Google OAuth ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub user_id: i64,
}

/// GET /auth/google/authorize: send the user to Google's consent screen.
pub async fn google_authorize(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<AuthorizeQuery>,
) -> Result<Redirect, ApiError> {
    let Some(oauth) = &state.oauth else {
        return Err(ApiError::Unavailable(
            "Google OAuth is not configured. Set GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET.".into(),
        ));
    };
    let Some(redirect_uri) = state.redirect_uri(&headers) else {
        return Err(ApiError::BadRequest("cannot determine OAuth redirect URI".into()));
    };
    let url = oauth.authorization_url(query.user_id, &redirect_uri)?;
    Ok(Redirect::temporary(&url))
}

#[derive(Debug, Deserialize)]
pub struct OAuthCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// GET /auth/google/callback: store the user's Sheets tokens.
pub async fn google_callback(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<OAuthCallbackQuery>,
) -> Response {
    if let Some(error) = query.error {
        let details = query.error_description.unwrap_or(error);
        return oauth_result_page(
            StatusCode::BAD_REQUEST,
            &format!("Google authorization failed: {details}"),
        );
    }
    let Some(code) = query.code.filter(|c| !c.is_empty()) else {
        return oauth_result_page(StatusCode::BAD_REQUEST, "Missing OAuth code in callback");
    };
    let Some(user_id) = query.state.as_deref().and_then(|s| s.parse::<i64>().ok()) else {
        return oauth_result_page(StatusCode::BAD_REQUEST, "Missing or invalid OAuth state");
    };
    let Some(oauth) = &state.oauth else {
        return oauth_result_page(
            StatusCode::SERVICE_UNAVAILABLE,
            "Google OAuth is not configured on this server",
        );
    };
    let Some(redirect_uri) = state.redirect_uri(&headers) else {
        return oauth_result_page(StatusCode::BAD_REQUEST, "Cannot determine OAuth redirect URI");
    };

    let tokens = match oauth.exchange_code(&code, &redirect_uri).await {
        Ok(tokens) => tokens,
        Err(e) => {
            warn!(user_id, "Google code exchange failed: {e}");
            return oauth_result_page(StatusCode::BAD_GATEWAY, &e.to_string());
        }
    };

    let saved = {
        let store = state.store.lock().await;
        match store.user(user_id) {
            Ok(Some(_)) => store
                .save_spreadsheet_config(user_id, &tokens.access_token, &tokens.refresh_token, None)
                .map(|_| true),
            Ok(None) => Ok(false),
            Err(e) => Err(e),
        }
    };

    match saved {
        Ok(true) => {
            info!(user_id, "connected Google account");
            oauth_result_page(
                StatusCode::OK,
                "Your Google account is connected. Your meals will now be logged to Google Sheets; \
                 you can close this window and return to the chat.",
            )
        }
        Ok(false) => oauth_result_page(StatusCode::NOT_FOUND, "Unknown user in OAuth state"),
        Err(e) => {
            error!(user_id, "failed to save Google tokens: {e}");
            oauth_result_page(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Could not save your Google connection. Please try again.",
            )
        }
    }
}

fn oauth_result_page(status: StatusCode, message: &str) -> Response {
    let escaped = message
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    let title = if status.is_success() {
        "Google Connected"
    } else {
        "Google Connection Failed"
    };
    let page = format!(
        r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>{title}</title>
  <style>
    body {{ margin: 0; min-height: 100vh; display: grid; place-items: center;
           font-family: "Segoe UI", sans-serif; background: #f3f7ef; color: #23301c; }}
    main {{ max-width: 28rem; padding: 2rem; text-align: center; }}
  </style>
</head>
<body>
  <main>
    <h1>{title}</h1>
    <p>{escaped}</p>
  </main>
</body>
</html>"#
    );
    (status, Html(page)).into_response()
}
