pub mod agent;
pub mod google;
pub mod openai;
pub mod providers;
pub mod runtime;
pub mod tools;

pub use agent::{AgentRequest, FoodAgent};
pub use google::{GoogleOAuthClient, GoogleTokens, SheetsClient};
pub use openai::OpenAiProvider;
pub use providers::{
    ChatMessage, ChatRole, ContentBlock, LlmProvider, LlmRequest, LlmResponse, MessagePart,
    ToolDefinition, Usage,
};
pub use runtime::{AgentRuntime, RuntimeSettings};
pub use tools::{NutritionToolbox, ToolOutput};
