//! Typing keep-alive around long-running work.

use std::future::Future;
use std::time::Duration;

use nutribot_channels::ChatTransport;
use nutribot_common::{Error, Result};
use tracing::debug;

/// Run `work` to completion while showing "typing…" in `chat_id`.
///
/// The indicator is sent immediately and then once per `interval` until
/// `work` settles. Indicator failures are ignored; the result of `work` is
/// returned as soon as it is ready.
pub async fn with_typing<T, Fut>(
    transport: &dyn ChatTransport,
    chat_id: i64,
    interval: Duration,
    work: Fut,
) -> Result<T>
where
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let mut task = tokio::spawn(work);
    loop {
        tokio::select! {
            joined = &mut task => {
                return joined.map_err(|e| Error::Agent(format!("agent task failed: {e}")))?;
            }
            () = pulse(transport, chat_id, interval) => {}
        }
    }
}

async fn pulse(transport: &dyn ChatTransport, chat_id: i64, interval: Duration) {
    if let Err(e) = transport.send_typing(chat_id).await {
        debug!(chat_id, "typing indicator failed: {e}");
    }
    tokio::time::sleep(interval).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingTransport;
    use tokio::time::{Instant, sleep};

    #[tokio::test(start_paused = true)]
    async fn typing_repeats_until_work_finishes() {
        let transport = RecordingTransport::default();
        let start = Instant::now();

        let value = with_typing(&transport, 7, Duration::from_secs(4), async {
            sleep(Duration::from_secs(9)).await;
            Ok::<_, Error>(42)
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(9));
        assert!(elapsed < Duration::from_secs(10));

        let typing = transport.typing.lock().unwrap().clone();
        assert_eq!(typing.len(), 3);
        assert!(typing.iter().all(|(chat, _)| *chat == 7));
        assert_eq!(typing[0].1 - start, Duration::ZERO);
        assert_eq!(typing[1].1 - start, Duration::from_secs(4));
        assert_eq!(typing[2].1 - start, Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn quick_work_sends_single_indicator() {
        let transport = RecordingTransport::default();
        let value = with_typing(&transport, 1, Duration::from_secs(4), async {
            Ok::<_, Error>("done")
        })
        .await
        .unwrap();
        assert_eq!(value, "done");
        assert!(transport.typing_count() <= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn typing_failures_do_not_affect_result() {
        let transport = RecordingTransport {
            fail_typing: true,
            ..Default::default()
        };
        let value = with_typing(&transport, 1, Duration::from_secs(4), async {
            sleep(Duration::from_secs(5)).await;
            Ok::<_, Error>(String::from("reply"))
        })
        .await
        .unwrap();
        assert_eq!(value, "reply");
        assert_eq!(transport.typing_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn work_errors_pass_through() {
        let transport = RecordingTransport::default();
        let err = with_typing(&transport, 1, Duration::from_secs(4), async {
            Err::<(), _>(Error::Agent("model unavailable".into()))
        })
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "agent error: model unavailable");
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_work_becomes_agent_error() {
        let transport = RecordingTransport::default();
        let err = with_typing(&transport, 1, Duration::from_secs(4), async {
            if std::hint::black_box(true) {
                panic!("agent crashed");
            }
            Ok::<(), Error>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Agent(_)));
    }
}
