pub mod loader;
pub mod model;

pub use loader::ConfigLoader;
pub use model::{
    AppConfig, ConversationConfig, DatabaseConfig, GatewayConfig, GoogleConfig, LlmConfig,
    TelegramConfig,
};
