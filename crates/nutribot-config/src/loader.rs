use std::path::Path;

use nutribot_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

/// Loads [`AppConfig`] from an optional YAML file and the process environment.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Read `.env`, the YAML file at `path` (if any), then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<AppConfig> {
        if let Ok(env_path) = dotenvy::dotenv() {
            debug!("loaded environment from {}", env_path.display());
        }

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => AppConfig::default(),
        };
        Self::apply_overrides(&mut config, |key| std::env::var(key).ok());
        Self::validate(&config)?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<AppConfig> {
        info!("loading config from {}", path.display());
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<AppConfig> {
        if raw.trim().is_empty() {
            return Ok(AppConfig::default());
        }
        serde_yaml::from_str(raw).map_err(|e| Error::Config(format!("invalid config file: {e}")))
    }

    /// Overlay values found through `lookup` on top of `config`.
    pub fn apply_overrides<F>(config: &mut AppConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("TELEGRAM_BOT_TOKEN") {
            config.telegram.bot_token = Some(v);
        }
        if let Some(v) = get("TELEGRAM_WEBHOOK_SECRET") {
            config.telegram.webhook_secret = Some(v);
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            config.llm.api_key = Some(v);
        }
        if let Some(v) = get("OPENAI_BASE_URL") {
            config.llm.base_url = Some(v);
        }
        if let Some(v) = get("OPENAI_MODEL") {
            config.llm.model = v;
        }
        if let Some(v) = get("GOOGLE_CLIENT_ID") {
            config.google.client_id = Some(v);
        }
        if let Some(v) = get("GOOGLE_CLIENT_SECRET") {
            config.google.client_secret = Some(v);
        }
        if let Some(v) = get("DATABASE_PATH") {
            config.database.path = v;
        }
        if let Some(v) = get("PUBLIC_URL") {
            config.gateway.public_url = Some(v.trim_end_matches('/').to_string());
        }
        if let Some(v) = get("HOST") {
            config.gateway.host = v;
        }
        if let Some(port) = get("PORT").and_then(|v| v.parse().ok()) {
            config.gateway.port = port;
        }
        if let Some(v) = get("LOG_LEVEL") {
            config.log_level = Some(v);
        }
    }

    pub fn validate(config: &AppConfig) -> Result<()> {
        let conversation = &config.conversation;
        if conversation.history_limit == 0 {
            return Err(Error::Config("conversation.history_limit must be > 0".into()));
        }
        if conversation.media_group_quiescence_ms == 0 {
            return Err(Error::Config(
                "conversation.media_group_quiescence_ms must be > 0".into(),
            ));
        }
        if conversation.typing_interval_secs == 0 {
            return Err(Error::Config(
                "conversation.typing_interval_secs must be > 0".into(),
            ));
        }
        if conversation.linking_code_ttl_minutes <= 0 {
            return Err(Error::Config(
                "conversation.linking_code_ttl_minutes must be > 0".into(),
            ));
        }
        if !(0.0..=2.0).contains(&config.llm.temperature) {
            return Err(Error::Config(format!(
                "llm.temperature must be within [0, 2], got {}",
                config.llm.temperature
            )));
        }
        Ok(())
    }
}
