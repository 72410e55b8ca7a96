//! Debounced batching of media-group fragments.
//!
//! Telegram delivers an album as one update per photo, all sharing a
//! `media_group_id`. Fragments are buffered per group and handed to the flush
//! handler together once no new fragment has arrived for the quiescence window.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use nutribot_common::Result;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

pub type FlushFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Downstream handler: `(group_id, fragments, context)`.
pub type FlushFn<F, C> = Arc<dyn Fn(String, Vec<F>, C) -> FlushFuture + Send + Sync>;

struct GroupBuffer<F, C> {
    /// Seeded by the first fragment of the group.
    context: C,
    fragments: Vec<F>,
    /// Bumped on every fragment; a timer only flushes the generation it was started for.
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

struct Shared<F, C> {
    groups: Mutex<HashMap<String, GroupBuffer<F, C>>>,
    quiescence: Duration,
    flush: FlushFn<F, C>,
}

/// Buffers fragments per group id and flushes each group once it goes quiet.
pub struct MediaGroupAccumulator<F, C> {
    shared: Arc<Shared<F, C>>,
}

impl<F, C> Clone for MediaGroupAccumulator<F, C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F, C> MediaGroupAccumulator<F, C>
where
    F: Send + 'static,
    C: Send + 'static,
{
    pub fn new(quiescence: Duration, flush: FlushFn<F, C>) -> Self {
        Self {
            shared: Arc::new(Shared {
                groups: Mutex::new(HashMap::new()),
                quiescence,
                flush,
            }),
        }
    }

    /// Buffer `fragment` under `group_id` and restart the group's quiet timer.
    ///
    /// `context` is only kept when this fragment opens the group. Returns as
    /// soon as the fragment is buffered; the caller must not process it itself.
    pub async fn add_fragment(&self, group_id: &str, fragment: F, context: C) {
        let superseded = {
            let mut groups = self.shared.groups.lock().await;
            let buffer = groups
                .entry(group_id.to_string())
                .or_insert_with(|| GroupBuffer {
                    context,
                    fragments: Vec::new(),
                    generation: 0,
                    timer: None,
                });
            buffer.fragments.push(fragment);
            buffer.generation += 1;
            debug!(
                media_group_id = %group_id,
                fragments = buffer.fragments.len(),
                "buffered media group fragment"
            );
            let timer = self.start_timer(group_id.to_string(), buffer.generation);
            buffer.timer.replace(timer)
        };

        if let Some(previous) = superseded {
            previous.abort();
            match previous.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => warn!(media_group_id = %group_id, "debounce timer failed: {e}"),
            }
        }
    }

    /// Number of groups currently buffering.
    pub async fn pending_groups(&self) -> usize {
        self.shared.groups.lock().await.len()
    }

    fn start_timer(&self, group_id: String, generation: u64) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            tokio::time::sleep(shared.quiescence).await;

            let buffer = {
                let mut groups = shared.groups.lock().await;
                let current = groups
                    .get(&group_id)
                    .is_some_and(|b| b.generation == generation);
                if current {
                    groups.remove(&group_id)
                } else {
                    None
                }
            };

            // The handler runs in its own task so aborting this timer can
            // never cancel a flush that already started.
            if let Some(buffer) = buffer {
                let flush = Arc::clone(&shared.flush);
                tokio::spawn(run_flush(flush, group_id, buffer.fragments, buffer.context));
            }
        })
    }
}

async fn run_flush<F, C>(flush: FlushFn<F, C>, group_id: String, fragments: Vec<F>, context: C) {
    debug!(
        media_group_id = %group_id,
        fragments = fragments.len(),
        "flushing media group"
    );
    let outcome = AssertUnwindSafe(async { flush(group_id.clone(), fragments, context).await })
        .catch_unwind()
        .await;
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(media_group_id = %group_id, "media group handler failed: {e}"),
        Err(_) => error!(media_group_id = %group_id, "media group handler panicked"),
    }
}
