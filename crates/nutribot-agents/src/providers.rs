use async_trait::async_trait;
use nutribot_common::Result;
use serde::{Deserialize, Serialize};

/// A chat-completion backend the runtime can drive.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short identifier used in logs (e.g. "openai").
    fn provider_id(&self) -> &str;

    /// Send a completion request and return the full response.
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse>;

    /// Whether the backend is reachable with the configured credentials.
    async fn health_check(&self) -> Result<bool>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub system: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: MessagePart,
}

impl ChatMessage {
    pub fn text(role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessagePart::Text(text.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessagePart {
    Text(String),
    Parts(Vec<ContentBlock>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    /// Image reference, either an https URL or a `data:` URL.
    #[serde(rename = "image")]
    Image { url: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: Vec<ContentBlock>,
    pub model: String,
    pub usage: Option<Usage>,
    pub stop_reason: Option<String>,
}

impl LlmResponse {
    /// Concatenated text blocks of the response.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = (&str, &str, &serde_json::Value)> {
        self.content.iter().filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, input } => Some((id.as_str(), name.as_str(), input)),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    /// Fold another completion's token counts into this running total.
    pub fn accumulate(&mut self, other: &Usage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_text_skips_tool_blocks() {
        let response = LlmResponse {
            content: vec![
                ContentBlock::Text {
                    text: "Logged ".into(),
                },
                ContentBlock::ToolUse {
                    id: "call_1".into(),
                    name: "query_nutritional_info".into(),
                    input: json!({}),
                },
                ContentBlock::Text {
                    text: "your lunch".into(),
                },
            ],
            model: "gpt-4o-mini".into(),
            usage: None,
            stop_reason: None,
        };

        assert_eq!(response.text(), "Logged your lunch");
        let calls: Vec<_> = response.tool_calls().collect();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, "query_nutritional_info");
    }

    #[test]
    fn usage_accumulates_across_completions() {
        let mut total = Usage::default();
        total.accumulate(&Usage {
            input_tokens: 120,
            output_tokens: 9,
        });
        total.accumulate(&Usage {
            input_tokens: 180,
            output_tokens: 31,
        });
        assert_eq!(
            total,
            Usage {
                input_tokens: 300,
                output_tokens: 40,
            }
        );
    }

    #[test]
    fn content_blocks_serialize_with_type_tag() {
        let block = ContentBlock::Image {
            url: "data:image/png;base64,AAAA".into(),
        };
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["type"], "image");
        assert_eq!(value["url"], "data:image/png;base64,AAAA");
    }
}
