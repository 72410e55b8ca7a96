use std::sync::Arc;

use axum::http::HeaderMap;
use nutribot_agents::GoogleOAuthClient;
use nutribot_channels::ChatTransport;
use nutribot_config::AppConfig;
use nutribot_db::SharedStore;

use crate::ingest::UpdateIngest;
use crate::orchestrator::Orchestrator;

pub const GOOGLE_CALLBACK_PATH: &str = "/auth/google/callback";

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub config: AppConfig,
    pub store: SharedStore,
    pub orchestrator: Arc<Orchestrator>,
    pub ingest: UpdateIngest,
    pub oauth: Option<GoogleOAuthClient>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(
        config: AppConfig,
        store: SharedStore,
        orchestrator: Arc<Orchestrator>,
        transport: Option<Arc<dyn ChatTransport>>,
    ) -> Self {
        let ingest = UpdateIngest::new(
            Arc::clone(&orchestrator),
            transport,
            config.conversation.quiescence(),
        );
        Self {
            config,
            store,
            orchestrator,
            ingest,
            oauth: None,
        }
    }

    pub fn with_google_oauth(mut self, oauth: GoogleOAuthClient) -> Self {
        self.oauth = Some(oauth);
        self
    }

    /// Where Google should send users back after consent.
    ///
    /// The configured public URL wins; otherwise the URL is rebuilt from the
    /// request's `Host` (and `X-Forwarded-Proto`, when behind a proxy).
    pub fn redirect_uri(&self, headers: &HeaderMap) -> Option<String> {
        if let Some(public_url) = self
            .config
            .gateway
            .public_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
        {
            return Some(format!(
                "{}{GOOGLE_CALLBACK_PATH}",
                public_url.trim().trim_end_matches('/')
            ));
        }

        let host = headers
            .get("x-forwarded-host")
            .or_else(|| headers.get(axum::http::header::HOST))
            .and_then(|v| v.to_str().ok())?;
        let scheme = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("http");
        Some(format!("{scheme}://{host}{GOOGLE_CALLBACK_PATH}"))
    }
}
