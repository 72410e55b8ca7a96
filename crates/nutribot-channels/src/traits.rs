use async_trait::async_trait;
use nutribot_common::Result;

/// How outbound text should be rendered by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFormat {
    /// Transport markup (MarkdownV2 on Telegram).
    Rich,
    Plain,
}

/// An inline button; pressing it sends `payload` back as a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyChoice {
    pub label: String,
    pub payload: String,
}

impl ReplyChoice {
    pub fn new(label: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            payload: payload.into(),
        }
    }
}

/// Outbound operations against a chat platform.
///
/// Shared as `Arc<dyn ChatTransport>` between the orchestrator, the keep-alive
/// loop and command handling.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Unique identifier for this transport type.
    fn channel_type(&self) -> &str;

    async fn send_text(&self, chat_id: i64, text: &str, format: TextFormat) -> Result<()>;

    /// Send text with one row of inline choices underneath.
    async fn send_choices(&self, chat_id: i64, text: &str, choices: &[ReplyChoice]) -> Result<()>;

    /// Show the "typing…" indicator.
    async fn send_typing(&self, chat_id: i64) -> Result<()>;

    /// Dismiss the loading state of a pressed inline button.
    async fn answer_callback(&self, callback_id: &str) -> Result<()>;
}

/// Two-step attachment retrieval: resolve a file id to a location, then fetch it.
#[async_trait]
pub trait FileSource: Send + Sync {
    /// `Ok(None)` when the platform knows the file but gives no download path.
    async fn resolve_file(&self, file_id: &str) -> Result<Option<String>>;

    async fn download_file(&self, location: &str) -> Result<Vec<u8>>;
}
