use nutribot_common::Result;
use tracing::warn;

use crate::traits::{ChatTransport, TextFormat};

/// Send `text` with rich formatting, retrying once as plain text if the
/// transport rejects the formatted payload.
pub async fn deliver_reply(transport: &dyn ChatTransport, chat_id: i64, text: &str) -> Result<()> {
    match transport.send_text(chat_id, text, TextFormat::Rich).await {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!(chat_id, "formatted send failed, retrying as plain text: {e}");
            transport.send_text(chat_id, text, TextFormat::Plain).await
        }
    }
}
