use crate::providers::{
    ChatMessage, ChatRole, ContentBlock, LlmProvider, LlmRequest, LlmResponse, MessagePart,
    Usage,
};
use async_trait::async_trait;
use nutribot_common::{Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible `/chat/completions` client.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            client: Client::new(),
            api_key,
            base_url,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn provider_id(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = convert_request(request)?;
        debug!(
            model = %body.model,
            messages = body.messages.len(),
            "sending chat completion"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Agent(format!("OpenAI request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Agent(format!(
                "OpenAI API error ({status}): {error_text}"
            )));
        }

        let parsed: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| Error::Agent(format!("failed to parse OpenAI response: {e}")))?;

        convert_response(parsed)
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/models", self.base_url);
        match self.client.get(&url).bearer_auth(&self.api_key).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

fn convert_request(request: &LlmRequest) -> Result<OpenAiRequest> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = &request.system {
        messages.push(OpenAiMessage::System {
            content: system.clone(),
        });
    }
    for msg in &request.messages {
        messages.push(convert_message(msg)?);
    }

    let tools = (!request.tools.is_empty()).then(|| {
        request
            .tools
            .iter()
            .map(|t| OpenAiTool {
                kind: "function".to_string(),
                function: OpenAiFunctionDefinition {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.input_schema.clone(),
                },
            })
            .collect()
    });

    Ok(OpenAiRequest {
        model: request.model.clone(),
        messages,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        tools,
    })
}

fn joined_text(parts: &[ContentBlock]) -> String {
    parts
        .iter()
        .filter_map(|p| match p {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn convert_message(msg: &ChatMessage) -> Result<OpenAiMessage> {
    match (msg.role, &msg.content) {
        (ChatRole::System, MessagePart::Text(t)) => Ok(OpenAiMessage::System { content: t.clone() }),
        (ChatRole::System, MessagePart::Parts(parts)) => Ok(OpenAiMessage::System {
            content: joined_text(parts),
        }),
        (ChatRole::User, MessagePart::Text(t)) => Ok(OpenAiMessage::User {
            content: OpenAiUserContent::Text(t.clone()),
        }),
        (ChatRole::User, MessagePart::Parts(parts)) => {
            let converted = parts
                .iter()
                .filter_map(|part| match part {
                    ContentBlock::Text { text } => {
                        Some(OpenAiContentPart::Text { text: text.clone() })
                    }
                    ContentBlock::Image { url } => Some(OpenAiContentPart::ImageUrl {
                        image_url: OpenAiImageUrl { url: url.clone() },
                    }),
                    _ => None,
                })
                .collect();
            Ok(OpenAiMessage::User {
                content: OpenAiUserContent::Parts(converted),
            })
        }
        (ChatRole::Assistant, MessagePart::Text(t)) => Ok(OpenAiMessage::Assistant {
            content: Some(t.clone()),
            tool_calls: None,
        }),
        (ChatRole::Assistant, MessagePart::Parts(parts)) => {
            let mut tool_calls = Vec::new();
            for part in parts {
                if let ContentBlock::ToolUse { id, name, input } = part {
                    tool_calls.push(OpenAiToolCall {
                        id: id.clone(),
                        kind: "function".to_string(),
                        function: OpenAiFunctionCall {
                            name: name.clone(),
                            arguments: serde_json::to_string(input)?,
                        },
                    });
                }
            }
            let text = joined_text(parts);
            Ok(OpenAiMessage::Assistant {
                content: (!text.is_empty()).then_some(text),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            })
        }
        (ChatRole::Tool, MessagePart::Parts(parts)) => parts
            .iter()
            .find_map(|p| match p {
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                } => Some(OpenAiMessage::Tool {
                    tool_call_id: tool_use_id.clone(),
                    content: content.clone(),
                }),
                _ => None,
            })
            .ok_or_else(|| Error::Agent("tool message missing tool_result content".to_string())),
        (ChatRole::Tool, MessagePart::Text(_)) => Err(Error::Agent(
            "tool message must carry a tool_result block".to_string(),
        )),
    }
}

fn convert_response(response: OpenAiResponse) -> Result<LlmResponse> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::Agent("no choices in OpenAI response".to_string()))?;

    let mut content = Vec::new();
    if let Some(text) = choice.message.content
        && !text.is_empty()
    {
        content.push(ContentBlock::Text { text });
    }
    for tc in choice.message.tool_calls.unwrap_or_default() {
        let input = serde_json::from_str(&tc.function.arguments)
            .unwrap_or(serde_json::Value::String(tc.function.arguments.clone()));
        content.push(ContentBlock::ToolUse {
            id: tc.id,
            name: tc.function.name,
            input,
        });
    }

    Ok(LlmResponse {
        content,
        model: response.model,
        usage: response.usage.map(|u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        }),
        stop_reason: choice.finish_reason,
    })
}

// Request types

#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
}

#[derive(Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum OpenAiMessage {
    System {
        content: String,
    },
    User {
        content: OpenAiUserContent,
    },
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<OpenAiToolCall>>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Serialize)]
#[serde(untagged)]
enum OpenAiUserContent {
    Text(String),
    Parts(Vec<OpenAiContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenAiContentPart {
    Text { text: String },
    ImageUrl { image_url: OpenAiImageUrl },
}

#[derive(Serialize)]
struct OpenAiImageUrl {
    url: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: OpenAiFunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    kind: String,
    function: OpenAiFunctionDefinition,
}

#[derive(Serialize)]
struct OpenAiFunctionDefinition {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Response types

#[derive(Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
