//! Entry point for Telegram webhook updates.

use std::sync::Arc;
use std::time::Duration;

use nutribot_channels::telegram::Update;
use nutribot_channels::{ChatTransport, InboundEvent, normalize};
use nutribot_common::IncomingTurn;
use tracing::{debug, info, warn};

use crate::accumulator::{FlushFn, FlushFuture, MediaGroupAccumulator};
use crate::orchestrator::Orchestrator;

/// Turns webhook updates into orchestrated turns, batching album fragments.
///
/// Media-group buffers carry the OAuth redirect URI of the first fragment's
/// request as their context.
pub struct UpdateIngest {
    orchestrator: Arc<Orchestrator>,
    transport: Option<Arc<dyn ChatTransport>>,
    media_groups: MediaGroupAccumulator<IncomingTurn, Option<String>>,
}

impl UpdateIngest {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        transport: Option<Arc<dyn ChatTransport>>,
        quiescence: Duration,
    ) -> Self {
        let target = Arc::clone(&orchestrator);
        let flush: FlushFn<IncomingTurn, Option<String>> = Arc::new(
            move |group_id: String, fragments: Vec<IncomingTurn>, redirect_uri: Option<String>| -> FlushFuture {
                let orchestrator = Arc::clone(&target);
                Box::pin(async move {
                    let Some(turn) = IncomingTurn::consolidate(fragments) else {
                        return Ok(());
                    };
                    info!(
                        media_group_id = %group_id,
                        photos = turn.attachments.photos.len(),
                        documents = turn.attachments.documents.len(),
                        "processing media group"
                    );
                    orchestrator
                        .handle_turn(turn, redirect_uri.as_deref())
                        .await;
                    Ok(())
                })
            },
        );

        Self {
            orchestrator,
            transport,
            media_groups: MediaGroupAccumulator::new(quiescence, flush),
        }
    }

    /// Process one update. Everything is handled or logged here; nothing is
    /// reported back to the webhook caller.
    pub async fn ingest(&self, update: Update, redirect_uri: Option<&str>) {
        let update_id = update.update_id;
        let Some(event) = InboundEvent::from_update(update) else {
            debug!(update_id, "ignoring update without message or callback");
            return;
        };

        if let InboundEvent::Callback(callback) = &event
            && let Some(transport) = &self.transport
            && let Err(e) = transport.answer_callback(&callback.id).await
        {
            warn!(update_id, "failed to answer callback query: {e}");
        }

        let turn = match normalize(event) {
            Ok(turn) => turn,
            Err(e) => {
                warn!(update_id, "dropping update: {e}");
                return;
            }
        };

        if let Some(group_id) = turn.media_group_id.clone() {
            self.media_groups
                .add_fragment(&group_id, turn, redirect_uri.map(str::to_string))
                .await;
            return;
        }

        self.orchestrator.handle_turn(turn, redirect_uri).await;
    }

    pub async fn pending_media_groups(&self) -> usize {
        self.media_groups.pending_groups().await
    }
}
