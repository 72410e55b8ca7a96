use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use nutribot_agents::{AgentRequest, FoodAgent, GoogleOAuthClient};
use nutribot_common::{IdentityKey, Result};
use nutribot_config::AppConfig;
use nutribot_db::{ConversationStore, SharedStore, UserProfile};
use nutribot_gateway::router::build_router;
use nutribot_gateway::state::AppState;
use nutribot_gateway::{Orchestrator, OrchestratorSettings};
use nutribot_media::MediaResolver;
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct EchoAgent {
    requests: Mutex<Vec<AgentRequest>>,
}

#[async_trait]
impl FoodAgent for EchoAgent {
    async fn reply(&self, request: AgentRequest) -> Result<String> {
        let reply = match (&request.text, request.images.len()) {
            (Some(text), 0) => format!("Noted: {text}"),
            (_, n) => format!("Analyzed {n} image(s)"),
        };
        self.requests.lock().unwrap().push(request);
        Ok(reply)
    }
}

struct TestApp {
    app: Router,
    store: SharedStore,
    agent: Arc<EchoAgent>,
}

fn test_app(config: AppConfig, oauth: Option<GoogleOAuthClient>) -> TestApp {
    let store = ConversationStore::in_memory().unwrap().into_shared();
    let agent = Arc::new(EchoAgent::default());
    let orchestrator = Orchestrator::new(
        store.clone(),
        agent.clone(),
        MediaResolver::inline_only(),
        OrchestratorSettings::from_config(&config),
    );
    let mut state = AppState::new(config, store.clone(), Arc::new(orchestrator), None);
    if let Some(oauth) = oauth {
        state = state.with_google_oauth(oauth);
    }
    TestApp {
        app: build_router(Arc::new(state)),
        store,
        agent,
    }
}

fn default_app() -> TestApp {
    test_app(AppConfig::default(), None)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn multipart(fields: &[(&str, &str)], images: &[&[u8]]) -> Request<Body> {
    let boundary = "nutribot-test-boundary";
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    for (i, image) in images.iter().enumerate() {
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"images\"; \
                 filename=\"meal{i}.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(image);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/agent-answer")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn telegram_text_update(text: &str) -> Value {
    json!({
        "update_id": 1,
        "message": {
            "message_id": 11,
            "from": {"id": 42, "is_bot": false, "first_name": "Ana"},
            "chat": {"id": 42, "type": "private"},
            "date": 1700000000,
            "text": text
        }
    })
}

#[tokio::test]
async fn health_reports_ok() {
    let t = default_app();
    let (status, body) = send(&t.app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");
}

#[tokio::test]
async fn webhook_processes_update_and_acknowledges() {
    let t = default_app();
    let (status, body) = send_json(
        &t.app,
        post_json("/webhook", telegram_text_update("I had 2 eggs")),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ok": true}));
    let requests = t.agent.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].text.as_deref(), Some("I had 2 eggs"));
}

#[tokio::test]
async fn webhook_acknowledges_malformed_payloads() {
    let t = default_app();
    let request = Request::builder()
        .method("POST")
        .uri("/webhook")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send_json(&t.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ok": true}));
}

#[tokio::test]
async fn webhook_enforces_secret_token() {
    let mut config = AppConfig::default();
    config.telegram.webhook_secret = Some("s3cret".into());
    let t = test_app(config, None);

    let (status, _) = send(&t.app, post_json("/webhook", telegram_text_update("hi"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(t.agent.requests.lock().unwrap().is_empty());

    let mut request = post_json("/webhook", telegram_text_update("hi"));
    request.headers_mut().insert(
        "x-telegram-bot-api-secret-token",
        "s3cret".parse().unwrap(),
    );
    let (status, _) = send(&t.app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(t.agent.requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn agent_answer_runs_turn_and_history_reads_it_back() {
    let t = default_app();

    let (status, body) = send_json(
        &t.app,
        multipart(
            &[
                ("user_id", "web-1"),
                ("email", "Ana@Example.com"),
                ("message_text", "A bowl of oatmeal"),
            ],
            &[],
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response_text"], "Noted: A bowl of oatmeal");
    assert_eq!(body["external_chat_id"], "web-1__general_chat");
    assert!(body["bot_message_id"].is_i64());
    assert!(body["user_id"].is_i64());

    let (status, history) = send_json(&t.app, get("/agent-answer/history?user_id=web-1")).await;
    assert_eq!(status, StatusCode::OK);
    let messages = history["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[0]["text"], "A bowl of oatmeal");
    assert_eq!(messages[1]["role"], "assistant");

    let store = t.store.lock().await;
    let user = store
        .find_user_by_key(&IdentityKey::Web("web-1".into()))
        .unwrap()
        .unwrap();
    assert_eq!(user.email.as_deref(), Some("ana@example.com"));
}

#[tokio::test]
async fn agent_answer_passes_uploaded_images() {
    let t = default_app();
    let (status, body) = send_json(
        &t.app,
        multipart(
            &[("user_id", "web-2"), ("chat_id", "kitchen")],
            &[b"\xFF\xD8\xFFjpeg-one", b"\xFF\xD8\xFFjpeg-two"],
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response_text"], "Analyzed 2 image(s)");
    assert_eq!(body["external_chat_id"], "kitchen");
    let requests = t.agent.requests.lock().unwrap();
    assert_eq!(requests[0].images[1], b"\xFF\xD8\xFFjpeg-two".to_vec());
}

#[tokio::test]
async fn agent_answer_without_content_is_rejected() {
    let t = default_app();
    let (status, body) = send_json(&t.app, multipart(&[("user_id", "web-1")], &[])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("neither text nor attachments"));

    let (status, _) = send_json(&t.app, multipart(&[("message_text", "hi")], &[])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(t.agent.requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn agent_answer_refuses_chats_owned_by_someone_else() {
    let t = default_app();
    send(&t.app, post_json("/webhook", telegram_text_update("my secret diet"))).await;

    let (status, body) = send_json(
        &t.app,
        multipart(
            &[
                ("user_id", "intruder"),
                ("chat_id", "42"),
                ("message_text", "what did I say?"),
            ],
            &[],
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().contains("another user"));
    assert_eq!(t.agent.requests.lock().unwrap().len(), 1);

    let store = t.store.lock().await;
    let chat = store.find_chat("42").unwrap().unwrap();
    let texts: Vec<_> = store
        .recent_messages(chat.id, 10)
        .unwrap()
        .into_iter()
        .map(|m| m.text)
        .collect();
    assert_eq!(
        texts,
        vec![Some("my secret diet".to_string()), Some("Noted: my secret diet".to_string())]
    );
}

#[tokio::test]
async fn history_for_unknown_user_is_not_found() {
    let t = default_app();
    let (status, _) = send_json(&t.app, get("/agent-answer/history?user_id=ghost")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn link_code_lifecycle() {
    let t = default_app();

    let (status, issued) = send_json(
        &t.app,
        post_json(
            "/api/user/generate-link-code",
            json!({"web_user_id": "web-9", "email": "bo@example.com"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let code = issued["code"].as_str().unwrap().to_string();
    assert_eq!(code.len(), 8);

    let (_, again) = send_json(
        &t.app,
        post_json(
            "/api/user/generate-link-code",
            json!({"web_user_id": "web-9"}),
        ),
    )
    .await;
    assert_eq!(again["code"], code.as_str());

    let (_, status_body) =
        send_json(&t.app, get("/api/user/link-status?web_user_id=web-9")).await;
    assert_eq!(status_body["linked"], false);

    {
        let store = t.store.lock().await;
        store
            .resolve_or_create_user(
                &[
                    IdentityKey::Telegram("42".into()),
                    IdentityKey::Web("web-9".into()),
                ],
                &UserProfile::default(),
            )
            .unwrap();
    }

    let (_, status_body) =
        send_json(&t.app, get("/api/user/link-status?web_user_id=web-9")).await;
    assert_eq!(status_body["linked"], true);
    assert_eq!(status_body["telegram_user_id"], "42");

    let (status, unlinked) = send_json(
        &t.app,
        post_json("/api/user/unlink", json!({"web_user_id": "web-9"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(unlinked["success"], true);

    let (_, status_body) =
        send_json(&t.app, get("/api/user/link-status?web_user_id=web-9")).await;
    assert_eq!(status_body["linked"], false);
}

#[tokio::test]
async fn blank_web_user_cannot_get_a_code() {
    let t = default_app();
    let (status, _) = send_json(
        &t.app,
        post_json("/api/user/generate-link-code", json!({"web_user_id": "  "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn delete_removes_web_user() {
    let t = default_app();
    send_json(
        &t.app,
        multipart(&[("user_id", "web-5"), ("message_text", "toast")], &[]),
    )
    .await;

    let (status, body) = send_json(
        &t.app,
        post_json("/api/user/delete", json!({"web_user_id": "web-5"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], true);

    let (_, body) = send_json(
        &t.app,
        post_json("/api/user/delete", json!({"web_user_id": "web-5"})),
    )
    .await;
    assert_eq!(body["deleted"], false);
    assert!(
        t.store
            .lock()
            .await
            .find_chat("web-5__general_chat")
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn google_authorize_requires_configuration() {
    let t = default_app();
    let (status, _) = send(&t.app, get("/auth/google/authorize?user_id=1")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn google_authorize_redirects_to_consent() {
    let mut config = AppConfig::default();
    config.gateway.public_url = Some("https://bot.example.com".into());
    let t = test_app(config, Some(GoogleOAuthClient::new("cid", "secret")));

    let response = t
        .app
        .clone()
        .oneshot(get("/auth/google/authorize?user_id=7"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let location = response.headers()["location"].to_str().unwrap();
    assert!(location.starts_with("https://accounts.google.com/o/oauth2/auth?"));
    assert!(location.contains("state=7"));
    assert!(location.contains("redirect_uri=https%3A%2F%2Fbot.example.com%2Fauth%2Fgoogle%2Fcallback"));
}

#[tokio::test]
async fn google_callback_stores_tokens() {
    let google = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("code=4%2Fabc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.fresh",
            "refresh_token": "1//keep",
            "expires_in": 3599
        })))
        .expect(1)
        .mount(&google)
        .await;

    let mut config = AppConfig::default();
    config.gateway.public_url = Some("https://bot.example.com".into());
    let oauth = GoogleOAuthClient::new("cid", "secret").with_endpoints(
        format!("{}/auth", google.uri()),
        format!("{}/token", google.uri()),
    );
    let t = test_app(config, Some(oauth));
    let user_id = t
        .store
        .lock()
        .await
        .resolve_or_create_user(&[IdentityKey::Telegram("42".into())], &UserProfile::default())
        .unwrap()
        .id;

    let (status, body) = send(
        &t.app,
        get(&format!("/auth/google/callback?code=4%2Fabc&state={user_id}")),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).unwrap().contains("Google Connected"));
    let config = t
        .store
        .lock()
        .await
        .spreadsheet_config(user_id)
        .unwrap()
        .unwrap();
    assert_eq!(config.access_token, "ya29.fresh");
    assert_eq!(config.refresh_token, "1//keep");
    assert_eq!(config.spreadsheet_id, None);
}

#[tokio::test]
async fn google_callback_reports_denied_consent() {
    let t = test_app(AppConfig::default(), Some(GoogleOAuthClient::new("cid", "secret")));
    let (status, body) = send(
        &t.app,
        get("/auth/google/callback?error=access_denied&state=1"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(String::from_utf8(body).unwrap().contains("access_denied"));
}
