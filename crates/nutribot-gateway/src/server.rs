use std::path::Path;
use std::sync::Arc;

use nutribot_agents::{
    AgentRuntime, GoogleOAuthClient, LlmProvider, OpenAiProvider, RuntimeSettings, SheetsClient,
};
use nutribot_channels::{ChatTransport, FileSource, TelegramTransport};
use nutribot_common::{Error, Result};
use nutribot_config::AppConfig;
use nutribot_db::ConversationStore;
use nutribot_media::MediaResolver;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::orchestrator::{Orchestrator, OrchestratorSettings};
use crate::router::build_router;
use crate::state::{AppState, SharedState};

/// Wires the store, agent runtime, Telegram transport and HTTP surface together.
pub struct GatewayServer {
    config: AppConfig,
}

impl GatewayServer {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Assemble every long-lived component from configuration.
    pub fn build_state(&self) -> Result<SharedState> {
        self.build().map(|(state, _)| state)
    }

    fn build(&self) -> Result<(SharedState, Arc<dyn LlmProvider>)> {
        let config = &self.config;
        let store = ConversationStore::open(Path::new(&config.database.path))?.into_shared();

        let api_key = config
            .llm
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::Config("an OpenAI API key is required (OPENAI_API_KEY)".into()))?;
        let provider: Arc<dyn LlmProvider> =
            Arc::new(OpenAiProvider::new(api_key, config.llm.base_url.clone()));
        let settings = RuntimeSettings {
            model: config.llm.model.clone(),
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
        };
        let mut runtime = AgentRuntime::new(Arc::clone(&provider), store.clone(), settings);

        let oauth = match config.google.credentials() {
            Some((client_id, client_secret)) => {
                let oauth = GoogleOAuthClient::new(client_id, client_secret);
                runtime = runtime.with_google(
                    oauth.clone(),
                    SheetsClient::new(oauth.clone(), store.clone()),
                );
                Some(oauth)
            }
            None => {
                warn!("Google credentials not configured, Sheets logging disabled");
                None
            }
        };

        let telegram = config
            .telegram
            .bot_token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .map(|token| Arc::new(TelegramTransport::new(token)));
        let media = match &telegram {
            Some(transport) => MediaResolver::new(Arc::clone(transport) as Arc<dyn FileSource>),
            None => {
                warn!("no Telegram bot token configured, only the HTTP API is served");
                MediaResolver::inline_only()
            }
        };
        let transport = telegram.map(|t| t as Arc<dyn ChatTransport>);

        let mut orchestrator = Orchestrator::new(
            store.clone(),
            Arc::new(runtime),
            media,
            OrchestratorSettings::from_config(config),
        );
        if let Some(transport) = &transport {
            orchestrator = orchestrator.with_transport(Arc::clone(transport));
        }

        let mut state = AppState::new(config.clone(), store, Arc::new(orchestrator), transport);
        if let Some(oauth) = oauth {
            state = state.with_google_oauth(oauth);
        }
        Ok((Arc::new(state), provider))
    }

    /// Serve until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        let (state, provider) = self.build()?;
        provider_ready(provider.as_ref()).await;
        let app = build_router(state);

        let addr = format!("{}:{}", self.config.gateway.host, self.config.gateway.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind {addr}: {e}")))?;
        info!("NutriBot gateway listening on {addr}");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("gateway stopped");
        Ok(())
    }
}

/// Startup check of the LLM backend. Serving continues either way; turns
/// apologize until the backend is reachable.
async fn provider_ready(provider: &dyn LlmProvider) -> bool {
    match provider.health_check().await {
        Ok(true) => {
            info!(provider = provider.provider_id(), "LLM provider reachable");
            true
        }
        Ok(false) => {
            warn!(provider = provider.provider_id(), "LLM provider rejected the health check");
            false
        }
        Err(e) => {
            warn!(provider = provider.provider_id(), "LLM provider health check failed: {e}");
            false
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
