use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use nutribot_common::{Error, HistoryEntry, MessageRole, Result};
use nutribot_db::SharedStore;
use tracing::{debug, info, instrument, warn};

use crate::agent::{AgentRequest, FoodAgent};
use crate::google::{GoogleOAuthClient, SheetsClient};
use crate::providers::{
    ChatMessage, ChatRole, ContentBlock, LlmProvider, LlmRequest, MessagePart, Usage,
};
use crate::tools::NutritionToolbox;

const MAX_TOOL_ITERATIONS: usize = 10;
const DEFAULT_PROMPT_TEXT: &str = "Please analyze this food.";

const SYSTEM_PROMPT: &str = "You are NutriAgent, a friendly nutritionist that lives in a chat app.

When the user sends a photo or a description of food:
- Identify the foods and estimate portion sizes.
- Estimate calories, proteins, carbs and fats for the whole meal, with a short per-ingredient breakdown.
- Register the meal with the register_nutritional_info tool, choosing breakfast, lunch, dinner or snack from the time of day and the conversation. Put ingredients, portions and per-ingredient macros in extra_details.

When the user asks about what they ate, use query_nutritional_info with the relevant date range and summarize the totals.
When the user wants their meals in Google Sheets, use register_google_account and pass on the link it returns.

Reply in the language the user writes in. Keep answers short and practical. If an image does not show food, say so and ask for a food photo.";

/// Model parameters for one runtime.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            max_tokens: 2048,
        }
    }
}

/// Tool-calling agent over an [`LlmProvider`], with the nutrition toolbox.
pub struct AgentRuntime {
    provider: Arc<dyn LlmProvider>,
    settings: RuntimeSettings,
    store: SharedStore,
    google: Option<(GoogleOAuthClient, SheetsClient)>,
}

impl AgentRuntime {
    pub fn new(provider: Arc<dyn LlmProvider>, store: SharedStore, settings: RuntimeSettings) -> Self {
        Self {
            provider,
            settings,
            store,
            google: None,
        }
    }

    pub fn with_google(mut self, oauth: GoogleOAuthClient, sheets: SheetsClient) -> Self {
        self.google = Some((oauth, sheets));
        self
    }

    fn toolbox(&self, user_id: i64, redirect_uri: Option<String>) -> NutritionToolbox {
        let toolbox = NutritionToolbox::new(user_id, redirect_uri, self.store.clone());
        match &self.google {
            Some((oauth, sheets)) => toolbox.with_google(oauth.clone(), sheets.clone()),
            None => toolbox,
        }
    }
}

#[async_trait]
impl FoodAgent for AgentRuntime {
    #[instrument(
        skip_all,
        fields(
            user_id = request.user_id,
            images = request.images.len(),
            history = request.history.len(),
            provider = self.provider.provider_id()
        )
    )]
    async fn reply(&self, request: AgentRequest) -> Result<String> {
        let toolbox = self.toolbox(request.user_id, request.redirect_uri.clone());
        let tools = NutritionToolbox::definitions();
        let system = build_system_prompt(Utc::now());

        let mut messages = history_messages(&request.history);
        messages.push(user_message(request.text.as_deref(), &request.images));

        let mut usage = Usage::default();
        for iteration in 0..MAX_TOOL_ITERATIONS {
            let llm_request = LlmRequest {
                model: self.settings.model.clone(),
                messages: messages.clone(),
                system: Some(system.clone()),
                max_tokens: Some(self.settings.max_tokens),
                temperature: Some(self.settings.temperature),
                tools: tools.clone(),
            };
            let response = self.provider.complete(&llm_request).await?;
            if let Some(step) = &response.usage {
                usage.accumulate(step);
            }

            let calls: Vec<(String, String, serde_json::Value)> = response
                .tool_calls()
                .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
                .collect();

            if calls.is_empty() {
                let text = response.text();
                if text.trim().is_empty() {
                    return Err(Error::Agent("model returned an empty reply".to_string()));
                }
                info!(
                    iteration,
                    reply_len = text.len(),
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    "agent reply ready"
                );
                return Ok(text);
            }

            debug!(iteration, calls = calls.len(), "running tool calls");
            messages.push(ChatMessage {
                role: ChatRole::Assistant,
                content: MessagePart::Parts(response.content.clone()),
            });

            for (id, name, input) in calls {
                let output = toolbox.execute(&name, input).await;
                debug!(tool = %name, is_error = output.is_error, "tool finished");
                messages.push(ChatMessage {
                    role: ChatRole::Tool,
                    content: MessagePart::Parts(vec![ContentBlock::ToolResult {
                        tool_use_id: id,
                        content: output.content,
                    }]),
                });
            }
        }

        warn!(
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "tool loop gave up"
        );
        Err(Error::Agent(format!(
            "tool loop exceeded maximum of {MAX_TOOL_ITERATIONS} iterations"
        )))
    }
}

fn build_system_prompt(now: DateTime<Utc>) -> String {
    format!(
        "{SYSTEM_PROMPT}\n\nCurrent date and time (UTC): {}",
        now.format("%Y-%m-%d %H:%M:%S")
    )
}

fn history_messages(history: &[HistoryEntry]) -> Vec<ChatMessage> {
    history
        .iter()
        .filter(|entry| !entry.text.trim().is_empty())
        .map(|entry| {
            let role = match entry.role {
                MessageRole::User => ChatRole::User,
                MessageRole::Assistant => ChatRole::Assistant,
            };
            ChatMessage::text(role, entry.text.clone())
        })
        .collect()
}

fn user_message(text: Option<&str>, images: &[Vec<u8>]) -> ChatMessage {
    let mut parts = Vec::with_capacity(images.len() + 1);
    if let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) {
        parts.push(ContentBlock::Text {
            text: text.to_string(),
        });
    }
    for image in images.iter().filter(|bytes| !bytes.is_empty()) {
        parts.push(ContentBlock::Image {
            url: image_data_url(image),
        });
    }
    if parts.is_empty() {
        parts.push(ContentBlock::Text {
            text: DEFAULT_PROMPT_TEXT.to_string(),
        });
    }
    ChatMessage {
        role: ChatRole::User,
        content: MessagePart::Parts(parts),
    }
}

fn image_data_url(bytes: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:{};base64,{encoded}", guess_image_media_type(bytes))
}

fn guess_image_media_type(data: &[u8]) -> &'static str {
    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        "image/png"
    } else if data.starts_with(&[0xFF, 0xD8]) {
        "image/jpeg"
    } else if data.starts_with(b"GIF") {
        "image/gif"
    } else if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/jpeg"
    }
}
