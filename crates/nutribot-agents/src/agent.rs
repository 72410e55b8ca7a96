use async_trait::async_trait;
use nutribot_common::{HistoryEntry, Result};

/// Everything the agent needs for one reply. Continuity comes entirely from
/// `history`; the agent keeps no state between calls.
#[derive(Debug, Clone, Default)]
pub struct AgentRequest {
    pub text: Option<String>,
    pub images: Vec<Vec<u8>>,
    pub history: Vec<HistoryEntry>,
    pub user_id: i64,
    /// OAuth callback URI offered by the Google account tool.
    pub redirect_uri: Option<String>,
}

/// Produces a reply for a user turn.
#[async_trait]
pub trait FoodAgent: Send + Sync {
    async fn reply(&self, request: AgentRequest) -> Result<String>;
}
