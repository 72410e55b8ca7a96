//! Recording doubles shared by the gateway's unit tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use nutribot_agents::{AgentRequest, FoodAgent};
use nutribot_channels::{ChatTransport, FileSource, ReplyChoice, TextFormat};
use nutribot_common::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Text {
        chat_id: i64,
        text: String,
        format: TextFormat,
    },
    Choices {
        chat_id: i64,
        text: String,
        choices: Vec<ReplyChoice>,
    },
}

impl Sent {
    pub fn text(&self) -> &str {
        match self {
            Self::Text { text, .. } | Self::Choices { text, .. } => text,
        }
    }
}

#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<Sent>>,
    pub typing: Mutex<Vec<(i64, tokio::time::Instant)>>,
    pub callbacks: Mutex<Vec<String>>,
    pub fail_typing: bool,
    pub fail_sends: bool,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn typing_count(&self) -> usize {
        self.typing.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    fn channel_type(&self) -> &str {
        "recording"
    }

    async fn send_text(&self, chat_id: i64, text: &str, format: TextFormat) -> Result<()> {
        if self.fail_sends {
            return Err(Error::Transport("send refused".into()));
        }
        self.sent.lock().unwrap().push(Sent::Text {
            chat_id,
            text: text.to_string(),
            format,
        });
        Ok(())
    }

    async fn send_choices(&self, chat_id: i64, text: &str, choices: &[ReplyChoice]) -> Result<()> {
        if self.fail_sends {
            return Err(Error::Transport("send refused".into()));
        }
        self.sent.lock().unwrap().push(Sent::Choices {
            chat_id,
            text: text.to_string(),
            choices: choices.to_vec(),
        });
        Ok(())
    }

    async fn send_typing(&self, chat_id: i64) -> Result<()> {
        self.typing
            .lock()
            .unwrap()
            .push((chat_id, tokio::time::Instant::now()));
        if self.fail_typing {
            return Err(Error::Transport("typing refused".into()));
        }
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str) -> Result<()> {
        self.callbacks.lock().unwrap().push(callback_id.to_string());
        Ok(())
    }
}

/// Agent that records its requests and answers with a fixed reply.
pub struct ScriptedAgent {
    pub reply: Option<String>,
    pub delay: Duration,
    pub requests: Mutex<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl FoodAgent for ScriptedAgent {
    async fn reply(&self, request: AgentRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.reply
            .clone()
            .ok_or_else(|| Error::Agent("model unavailable".into()))
    }
}

/// File source serving fixed bytes per file id.
#[derive(Default)]
pub struct FakeFiles {
    files: std::collections::HashMap<String, Vec<u8>>,
}

impl FakeFiles {
    pub fn with(files: &[(&str, &[u8])]) -> Self {
        Self {
            files: files
                .iter()
                .map(|(id, bytes)| (id.to_string(), bytes.to_vec()))
                .collect(),
        }
    }
}

#[async_trait]
impl FileSource for FakeFiles {
    async fn resolve_file(&self, file_id: &str) -> Result<Option<String>> {
        Ok(self.files.contains_key(file_id).then(|| file_id.to_string()))
    }

    async fn download_file(&self, location: &str) -> Result<Vec<u8>> {
        self.files
            .get(location)
            .cloned()
            .ok_or_else(|| Error::Transport(format!("no file at {location}")))
    }
}
