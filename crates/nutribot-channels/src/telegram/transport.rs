use async_trait::async_trait;
use nutribot_common::{Error, Result};
use teloxide::prelude::*;
use teloxide::types::{
    BotCommand, CallbackQueryId, ChatAction, FileId, InlineKeyboardButton, InlineKeyboardMarkup,
    ParseMode,
};
use tracing::{debug, info};

use super::markdown::to_markdown_v2;
use crate::traits::{ChatTransport, FileSource, ReplyChoice, TextFormat};

const FILE_API_BASE: &str = "https://api.telegram.org/file";

/// Outbound side of the Telegram bot: messages, typing, callbacks and file downloads.
#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
    http: reqwest::Client,
    file_base: String,
}

impl TelegramTransport {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot: Bot::new(bot_token),
            http: reqwest::Client::new(),
            file_base: FILE_API_BASE.to_string(),
        }
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    /// Register `{base_url}/webhook` with Telegram.
    pub async fn set_webhook(&self, base_url: &str, secret_token: Option<&str>) -> Result<String> {
        let webhook = format!("{}/webhook", base_url.trim_end_matches('/'));
        let url = url::Url::parse(&webhook)
            .map_err(|e| Error::Validation(format!("invalid webhook url {webhook}: {e}")))?;

        let mut request = self.bot.set_webhook(url);
        if let Some(secret) = secret_token.filter(|s| !s.is_empty()) {
            request = request.secret_token(secret.to_string());
        }
        request.await.map_err(transport_error)?;
        info!(url = %webhook, has_secret_token = secret_token.is_some(), "webhook registered");
        Ok(webhook)
    }

    pub async fn delete_webhook(&self) -> Result<()> {
        self.bot.delete_webhook().await.map_err(transport_error)?;
        info!("webhook deleted");
        Ok(())
    }

    /// Publish the command menu shown by Telegram clients.
    pub async fn set_commands(&self, commands: &[(&str, &str)]) -> Result<()> {
        let commands: Vec<BotCommand> = commands
            .iter()
            .map(|(name, description)| BotCommand::new(*name, *description))
            .collect();
        self.bot
            .set_my_commands(commands)
            .await
            .map_err(transport_error)?;
        Ok(())
    }
}

fn transport_error(e: teloxide::RequestError) -> Error {
    Error::Transport(format!("telegram request failed: {e}"))
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    fn channel_type(&self) -> &str {
        "telegram"
    }

    async fn send_text(&self, chat_id: i64, text: &str, format: TextFormat) -> Result<()> {
        match format {
            TextFormat::Rich => {
                self.bot
                    .send_message(ChatId(chat_id), to_markdown_v2(text))
                    .parse_mode(ParseMode::MarkdownV2)
                    .await
                    .map_err(transport_error)?;
            }
            TextFormat::Plain => {
                self.bot
                    .send_message(ChatId(chat_id), text)
                    .await
                    .map_err(transport_error)?;
            }
        }
        Ok(())
    }

    async fn send_choices(&self, chat_id: i64, text: &str, choices: &[ReplyChoice]) -> Result<()> {
        let row: Vec<InlineKeyboardButton> = choices
            .iter()
            .map(|c| InlineKeyboardButton::callback(c.label.clone(), c.payload.clone()))
            .collect();
        self.bot
            .send_message(ChatId(chat_id), text)
            .reply_markup(InlineKeyboardMarkup::new(vec![row]))
            .await
            .map_err(transport_error)?;
        Ok(())
    }

    async fn send_typing(&self, chat_id: i64) -> Result<()> {
        self.bot
            .send_chat_action(ChatId(chat_id), ChatAction::Typing)
            .await
            .map_err(transport_error)?;
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str) -> Result<()> {
        self.bot
            .answer_callback_query(CallbackQueryId(callback_id.to_string()))
            .await
            .map_err(transport_error)?;
        Ok(())
    }
}

#[async_trait]
impl FileSource for TelegramTransport {
    async fn resolve_file(&self, file_id: &str) -> Result<Option<String>> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .map_err(transport_error)?;
        if file.path.is_empty() {
            return Ok(None);
        }
        Ok(Some(file.path))
    }

    async fn download_file(&self, location: &str) -> Result<Vec<u8>> {
        // File URLs embed the bot token; never log the full URL.
        let url = format!("{}/bot{}/{}", self.file_base, self.bot.token(), location);
        debug!(path = location, "downloading telegram file");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Media(format!("file download failed: {}", e.without_url())))?;
        if !response.status().is_success() {
            return Err(Error::Media(format!(
                "file download failed: HTTP {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Media(format!("failed to read file body: {}", e.without_url())))?;
        Ok(bytes.to_vec())
    }
}
