use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use nutribot_agents::{AgentRequest, FoodAgent};
use nutribot_channels::{ChatTransport, deliver_reply};
use nutribot_common::{
    ContentType, Error, HistoryEntry, IdentityKey, IncomingTurn, MessageRole, Result,
    SenderIdentity, TurnOrigin,
};
use nutribot_config::AppConfig;
use nutribot_db::{SharedStore, UserProfile};
use nutribot_media::MediaResolver;
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::commands::CommandHandler;
use crate::liveness;

pub const APOLOGY_TEXT: &str =
    "I apologize, but I encountered an error while analyzing your food. Please try again.";

/// How a turn was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRoute {
    Command,
    Guidance,
    Agent,
    /// The turn failed and the user got an apology.
    Failed,
    /// The turn was refused before anything was stored.
    Rejected,
}

/// Result of handling one turn, as reported to HTTP callers.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub route: TurnRoute,
    pub reply: String,
    pub user_id: Option<i64>,
    pub chat_id: Option<i64>,
    pub external_chat_id: String,
    pub assistant_message_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Prior messages handed to the agent.
    pub history_limit: usize,
    pub typing_interval: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            history_limit: 10,
            typing_interval: Duration::from_secs(4),
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            history_limit: config.conversation.history_limit,
            typing_interval: config.conversation.typing_interval(),
        }
    }
}

/// Drives a canonical turn through commands, persistence, media resolution,
/// the agent and delivery.
pub struct Orchestrator {
    store: SharedStore,
    agent: Arc<dyn FoodAgent>,
    transport: Option<Arc<dyn ChatTransport>>,
    media: MediaResolver,
    commands: CommandHandler,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        store: SharedStore,
        agent: Arc<dyn FoodAgent>,
        media: MediaResolver,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            commands: CommandHandler::new(store.clone()),
            store,
            agent,
            transport: None,
            media,
            settings,
        }
    }

    /// Transport used to answer turns that arrived over Telegram.
    pub fn with_transport(mut self, transport: Arc<dyn ChatTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Handle one turn end to end. Never fails: errors become an apology.
    ///
    /// `redirect_uri` is the Google OAuth callback offered by the agent's
    /// account-linking tool.
    #[instrument(
        skip_all,
        fields(turn_id = %Uuid::new_v4(), chat = %turn.external_chat_id, sender = %turn.sender.key, origin_message_id = ?turn.origin_message_id)
    )]
    pub async fn handle_turn(&self, turn: IncomingTurn, redirect_uri: Option<&str>) -> TurnOutcome {
        if let Some(command) = turn.command()
            && turn.chat_kind.is_single_party()
        {
            return self.run_command(&command, &turn).await;
        }

        match self.run_pipeline(&turn, redirect_uri).await {
            Ok(outcome) => outcome,
            Err(Error::Validation(reason)) => reject(&turn, reason),
            Err(e) => self.apologize(&turn, e).await,
        }
    }

    async fn run_command(&self, command: &str, turn: &IncomingTurn) -> TurnOutcome {
        info!(command, "routing command");
        let reply = self.commands.handle(command, turn).await;

        if let Some((transport, chat_id)) = self.reply_target(turn) {
            let sent = if reply.choices.is_empty() {
                deliver_reply(transport, chat_id, &reply.text).await
            } else {
                transport.send_choices(chat_id, &reply.text, &reply.choices).await
            };
            if let Err(e) = sent {
                warn!(chat_id, command, "failed to send command reply: {e}");
            }
        }

        TurnOutcome {
            route: TurnRoute::Command,
            reply: reply.text,
            user_id: None,
            chat_id: None,
            external_chat_id: turn.external_chat_id.clone(),
            assistant_message_id: None,
            timestamp: Utc::now(),
        }
    }

    async fn run_pipeline(
        &self,
        turn: &IncomingTurn,
        redirect_uri: Option<&str>,
    ) -> Result<TurnOutcome> {
        // History is read before the inbound message is stored so the
        // current turn never shows up in its own context.
        let (user, chat, history) = {
            let store = self.store.lock().await;
            let user = store.resolve_or_create_user(
                std::slice::from_ref(&turn.sender.key),
                &sender_profile(&turn.sender),
            )?;
            let owner = turn.chat_kind.is_single_party().then_some(user.id);
            let chat = store.resolve_or_create_chat(&turn.external_chat_id, owner, turn.chat_kind)?;
            if owner.is_some()
                && let Some(chat_owner) = chat.owner_user_id
                && chat_owner != user.id
            {
                return Err(Error::Validation(format!(
                    "chat {} belongs to another user",
                    chat.external_chat_id
                )));
            }
            let history = store
                .recent_messages(chat.id, self.settings.history_limit)?
                .into_iter()
                .filter_map(|message| {
                    let text = message.text.filter(|t| !t.trim().is_empty())?;
                    Some(HistoryEntry {
                        role: message.role,
                        text,
                    })
                })
                .collect::<Vec<_>>();
            store.append_message(
                chat.id,
                MessageRole::User,
                turn.content_type(),
                turn.text.as_deref(),
                turn.origin_message_id,
                Some(user.id),
            )?;
            (user, chat, history)
        };

        let media = self
            .media
            .resolve(&turn.attachments, turn.text.as_deref())
            .await;

        if let Some(guidance) = media.guidance {
            info!(user_id = user.id, chat_id = chat.id, "answering with media guidance");
            if let Some((transport, chat_id)) = self.reply_target(turn) {
                deliver_reply(transport, chat_id, &guidance).await?;
            }
            let stored = self.store.lock().await.append_message(
                chat.id,
                MessageRole::Assistant,
                ContentType::Text,
                Some(&guidance),
                None,
                None,
            )?;
            return Ok(TurnOutcome {
                route: TurnRoute::Guidance,
                reply: guidance,
                user_id: Some(user.id),
                chat_id: Some(chat.id),
                external_chat_id: chat.external_chat_id,
                assistant_message_id: Some(stored.id),
                timestamp: stored.created_at,
            });
        }

        let request = AgentRequest {
            text: turn.text.clone().filter(|t| !t.trim().is_empty()),
            images: media.images,
            history,
            user_id: user.id,
            redirect_uri: redirect_uri.map(str::to_string),
        };
        let reply = self.invoke_agent(turn, request).await?;

        let stored = self.store.lock().await.append_message(
            chat.id,
            MessageRole::Assistant,
            ContentType::Text,
            Some(&reply),
            None,
            None,
        )?;
        if let Some((transport, chat_id)) = self.reply_target(turn) {
            deliver_reply(transport, chat_id, &reply).await?;
        }
        info!(user_id = user.id, chat_id = chat.id, "turn answered");

        Ok(TurnOutcome {
            route: TurnRoute::Agent,
            reply,
            user_id: Some(user.id),
            chat_id: Some(chat.id),
            external_chat_id: chat.external_chat_id,
            assistant_message_id: Some(stored.id),
            timestamp: stored.created_at,
        })
    }

    async fn invoke_agent(&self, turn: &IncomingTurn, request: AgentRequest) -> Result<String> {
        let agent = Arc::clone(&self.agent);
        let work = async move { agent.reply(request).await };
        match self.reply_target(turn) {
            Some((transport, chat_id)) => {
                liveness::with_typing(transport, chat_id, self.settings.typing_interval, work).await
            }
            None => work.await,
        }
    }

    async fn apologize(&self, turn: &IncomingTurn, err: Error) -> TurnOutcome {
        error!(
            chat = %turn.external_chat_id,
            sender = %turn.sender.key,
            origin_message_id = ?turn.origin_message_id,
            "turn failed: {err}"
        );

        if let Some((transport, chat_id)) = self.reply_target(turn)
            && let Err(e) = deliver_reply(transport, chat_id, APOLOGY_TEXT).await
        {
            warn!(chat_id, "failed to send apology: {e}");
        }

        let chat_id = {
            let store = self.store.lock().await;
            match store.find_chat(&turn.external_chat_id) {
                Ok(Some(chat)) => {
                    if let Err(e) = store.append_message(
                        chat.id,
                        MessageRole::Assistant,
                        ContentType::Text,
                        Some(APOLOGY_TEXT),
                        None,
                        None,
                    ) {
                        warn!(chat_id = chat.id, "failed to record apology: {e}");
                    }
                    Some(chat.id)
                }
                Ok(None) => None,
                Err(e) => {
                    warn!("failed to look up chat for apology: {e}");
                    None
                }
            }
        };

        TurnOutcome {
            route: TurnRoute::Failed,
            reply: APOLOGY_TEXT.to_string(),
            user_id: None,
            chat_id,
            external_chat_id: turn.external_chat_id.clone(),
            assistant_message_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Transport and chat to answer on, for turns that came in over Telegram.
    fn reply_target(&self, turn: &IncomingTurn) -> Option<(&dyn ChatTransport, i64)> {
        match (&turn.origin, &self.transport) {
            (TurnOrigin::Telegram { chat_id, .. }, Some(transport)) => {
                Some((transport.as_ref(), *chat_id))
            }
            _ => None,
        }
    }
}

/// Refusals are not persisted or delivered: the chat may belong to someone else.
fn reject(turn: &IncomingTurn, reason: String) -> TurnOutcome {
    warn!(
        chat = %turn.external_chat_id,
        sender = %turn.sender.key,
        "rejecting turn: {reason}"
    );
    TurnOutcome {
        route: TurnRoute::Rejected,
        reply: reason,
        user_id: None,
        chat_id: None,
        external_chat_id: turn.external_chat_id.clone(),
        assistant_message_id: None,
        timestamp: Utc::now(),
    }
}

/// Profile hints carried by a turn's sender, keyed by its identity.
pub(crate) fn sender_profile(sender: &SenderIdentity) -> UserProfile {
    let mut profile = UserProfile {
        username: sender.username.clone(),
        first_name: sender.first_name.clone(),
        email: sender.email.clone(),
        ..Default::default()
    };
    match &sender.key {
        IdentityKey::Telegram(id) => profile.telegram_user_id = Some(id.clone()),
        IdentityKey::Web(id) => profile.web_user_id = Some(id.clone()),
    }
    profile
}
