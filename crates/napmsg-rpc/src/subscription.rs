//! Background watcher lifecycle
//!
//! At most one watcher task exists at a time. Replacing or stopping it is
//! always cancel, then await, then (optionally) start the next one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use napmsg_gateway::{EventPipeline, EventSource, WatchFilter};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::output::Outbox;
use crate::protocol::{JsonRpcNotification, RECEIVE_METHOD};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    NoSubscription,
    /// Task spawned, event stream not yet open
    Starting,
    Running,
}

/// The live watcher and what it was started with
struct Subscription {
    url: String,
    filter: WatchFilter,
    asr_enabled: bool,
    cancel: CancellationToken,
    connected: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

#[derive(Default)]
pub struct SubscriptionRunner {
    current: Option<Subscription>,
}

impl SubscriptionRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// A watcher whose stream ended on its own counts as gone
    pub fn state(&self) -> SubscriptionState {
        match &self.current {
            None => SubscriptionState::NoSubscription,
            Some(sub) if sub.task.is_finished() => SubscriptionState::NoSubscription,
            Some(sub) if sub.connected.load(Ordering::Acquire) => SubscriptionState::Running,
            Some(_) => SubscriptionState::Starting,
        }
    }

    /// Filter of the live watcher, if any
    pub fn filter(&self) -> Option<&WatchFilter> {
        self.current
            .as_ref()
            .filter(|s| !s.task.is_finished())
            .map(|s| &s.filter)
    }

    /// Start watching `url`, replacing any running watcher
    pub async fn start(
        &mut self,
        url: String,
        source: Arc<dyn EventSource>,
        pipeline: EventPipeline,
        outbox: Outbox,
    ) {
        self.stop().await;

        let cancel = CancellationToken::new();
        let connected = Arc::new(AtomicBool::new(false));
        let filter = pipeline.filter().clone();
        let asr_enabled = pipeline.asr_enabled();
        info!(
            "Subscribing to {} (group {:?}, user {:?}, asr {})",
            url,
            filter.from_group.as_ref().map(|g| g.as_str()),
            filter.from_user.as_ref().map(|u| u.as_str()),
            asr_enabled
        );

        let task = tokio::spawn(watch(
            url.clone(),
            source,
            pipeline,
            outbox,
            cancel.clone(),
            connected.clone(),
        ));

        self.current = Some(Subscription {
            url,
            filter,
            asr_enabled,
            cancel,
            connected,
            task,
        });
    }

    /// Cancel and await the running watcher. Returns whether one existed.
    pub async fn stop(&mut self) -> bool {
        let Some(sub) = self.current.take() else {
            return false;
        };
        debug!(
            "Stopping subscription to {} (asr {})",
            sub.url, sub.asr_enabled
        );
        sub.cancel.cancel();
        match sub.task.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => error!("Watcher task failed: {}", e),
        }
        true
    }
}

/// Watcher loop. Ends on cancellation, stream end, or a connection fault.
async fn watch(
    url: String,
    source: Arc<dyn EventSource>,
    pipeline: EventPipeline,
    outbox: Outbox,
    cancel: CancellationToken,
    connected: Arc<AtomicBool>,
) {
    let mut events = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        opened = source.open(&url) => match opened {
            Ok(events) => events,
            Err(e) => {
                warn!("Failed to open event stream: {}", e);
                return;
            }
        },
    };
    connected.store(true, Ordering::Release);

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = events.next() => next,
        };
        let raw = match next {
            Some(Ok(raw)) => raw,
            Some(Err(e)) => {
                warn!("Event stream failed: {}", e);
                break;
            }
            None => {
                info!("Event stream ended");
                break;
            }
        };

        let processed = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            processed = pipeline.process(raw) => processed,
        };
        let params = match processed {
            Ok(Some(params)) => params,
            Ok(None) => continue,
            Err(e) => {
                warn!("Failed to process event: {}", e);
                continue;
            }
        };

        if cancel.is_cancelled() {
            break;
        }
        let params = match serde_json::to_value(&params) {
            Ok(params) => params,
            Err(e) => {
                warn!("Failed to encode notification: {}", e);
                continue;
            }
        };
        if let Err(e) = outbox
            .write_json(&JsonRpcNotification::new(RECEIVE_METHOD, params))
            .await
        {
            error!("Failed to write notification: {}", e);
            break;
        }
    }

    debug!("Watcher for {} stopped", url);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::tests::{FakeEvents, RecordingRelay, lines, wait_for_state};
    use async_trait::async_trait;
    use napmsg_asr::{AsrClient, AsrConfig, Credentials};
    use napmsg_gateway::{Command, GatewayError, Relay, RelayTarget};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn pipeline(filter: WatchFilter) -> EventPipeline {
        EventPipeline::new(
            filter,
            Arc::new(RecordingRelay::default()),
            RelayTarget {
                url: "ws://gw".into(),
                timeout: Duration::from_secs(1),
            },
            None,
        )
    }

    fn message(text: &str) -> serde_json::Value {
        json!({
            "post_type": "message",
            "message_type": "private",
            "user_id": 42,
            "message": [{"type": "text", "data": {"text": text}}],
        })
    }

    #[tokio::test]
    async fn test_forwards_events_in_order() {
        let (writer, reader) = tokio::io::duplex(1 << 16);
        let mut output = lines(reader);
        let events = Arc::new(FakeEvents::default());
        let mut runner = SubscriptionRunner::new();
        assert_eq!(runner.state(), SubscriptionState::NoSubscription);

        runner
            .start(
                "ws://gw".into(),
                events.clone(),
                pipeline(WatchFilter::default()),
                Outbox::new(writer),
            )
            .await;
        wait_for_state(&runner, SubscriptionState::Running).await;

        events.emit(message("one"));
        events.emit(json!({"post_type": "meta_event"}));
        events.emit(message("/skip"));
        events.emit(json!({"post_type": "message", "group_id": {"nested": true}}));
        events.emit(message("two"));

        let first = output.next_json().await;
        let second = output.next_json().await;
        assert_eq!(first["method"], "message.receive");
        assert_eq!(first["params"]["text"], "one");
        assert_eq!(second["params"]["text"], "two");
        assert_eq!(runner.state(), SubscriptionState::Running);
        assert!(runner.stop().await);
    }

    #[tokio::test]
    async fn test_stream_end_reports_no_subscription() {
        let (writer, _reader) = tokio::io::duplex(1024);
        let events = Arc::new(FakeEvents::default());
        let mut runner = SubscriptionRunner::new();
        runner
            .start(
                "ws://gw".into(),
                events.clone(),
                pipeline(WatchFilter::default()),
                Outbox::new(writer),
            )
            .await;
        wait_for_state(&runner, SubscriptionState::Running).await;
        assert!(runner.filter().is_some());

        events.fail("connection reset");
        wait_for_state(&runner, SubscriptionState::NoSubscription).await;
        assert!(runner.filter().is_none());
        assert!(runner.stop().await);
        assert!(!runner.stop().await);
    }

    #[tokio::test]
    async fn test_open_failure_ends_watcher() {
        let (writer, _reader) = tokio::io::duplex(1024);
        let events = Arc::new(FakeEvents::refusing());
        let mut runner = SubscriptionRunner::new();
        runner
            .start(
                "ws://gw".into(),
                events,
                pipeline(WatchFilter::default()),
                Outbox::new(writer),
            )
            .await;
        wait_for_state(&runner, SubscriptionState::NoSubscription).await;
    }

    #[tokio::test]
    async fn test_stop_closes_stream() {
        let (writer, reader) = tokio::io::duplex(1 << 16);
        let mut output = lines(reader);
        let events = Arc::new(FakeEvents::default());
        let mut runner = SubscriptionRunner::new();
        runner
            .start(
                "ws://gw".into(),
                events.clone(),
                pipeline(WatchFilter::default()),
                Outbox::new(writer),
            )
            .await;
        wait_for_state(&runner, SubscriptionState::Running).await;

        assert!(runner.stop().await);
        events.emit(message("late"));
        assert!(output.next_within(Duration::from_millis(200)).await.is_none());
        assert_eq!(events.live_streams(), 0);
    }

    /// Relay whose commands never complete
    #[derive(Default)]
    struct StalledRelay {
        called: Notify,
    }

    #[async_trait]
    impl Relay for StalledRelay {
        async fn send_command(
            &self,
            _target: &RelayTarget,
            _command: Command,
        ) -> Result<serde_json::Value, GatewayError> {
            self.called.notify_one();
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_stop_while_processing_emits_nothing() {
        let (writer, reader) = tokio::io::duplex(1 << 16);
        let mut output = lines(reader);
        let events = Arc::new(FakeEvents::default());
        let relay = Arc::new(StalledRelay::default());
        let asr = AsrClient::new(AsrConfig {
            credentials: Credentials::new("id", "key"),
            ..AsrConfig::default()
        })
        .unwrap();
        let pipeline = EventPipeline::new(
            WatchFilter::default(),
            relay.clone(),
            RelayTarget {
                url: "ws://gw".into(),
                timeout: Duration::from_secs(1),
            },
            Some(Arc::new(asr)),
        );

        let mut runner = SubscriptionRunner::new();
        runner
            .start("ws://gw".into(), events.clone(), pipeline, Outbox::new(writer))
            .await;
        wait_for_state(&runner, SubscriptionState::Running).await;

        events.emit(json!({
            "post_type": "message",
            "message_type": "private",
            "user_id": 42,
            "message": [{"type": "record", "data": {"file": "v.amr"}}],
        }));
        // Voice fetch is now in flight and never returns
        tokio::time::timeout(Duration::from_secs(5), relay.called.notified())
            .await
            .unwrap();

        let stopped = tokio::time::timeout(Duration::from_secs(5), runner.stop()).await;
        assert_eq!(stopped.ok(), Some(true));
        assert!(output.next_within(Duration::from_millis(200)).await.is_none());
        assert_eq!(events.live_streams(), 0);
    }
}
