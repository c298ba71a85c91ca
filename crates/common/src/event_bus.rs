use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(pub &'static str);

#[derive(Debug, Clone)]
pub struct EventEnvelope<T: Clone + Send + Sync + Debug + 'static> {
    pub topic: Topic,
    pub payload: T,
    pub ts_ms: u128,
}

/// Topic-keyed broadcast bus used as the notification boundary.
///
/// Delivery is best-effort: a publish with no subscribers, a lagging
/// subscriber, or a timed-out send is logged and counted, never surfaced to
/// the pipeline as an error.
#[derive(Clone)]
pub struct EventBus<T: Clone + Send + Sync + Debug + 'static> {
    inner: Arc<RwLock<Inner<T>>>,
    dropped: Arc<AtomicU64>,
    publish_timeout: Duration,
    subscribe_buffer: usize,
}

struct Inner<T: Clone + Send + Sync + Debug + 'static> {
    topics: HashMap<&'static str, broadcast::Sender<EventEnvelope<T>>>,
}

impl<T: Clone + Send + Sync + Debug + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new(1024, Duration::from_millis(500))
    }
}

impl<T: Clone + Send + Sync + Debug + 'static> EventBus<T> {
    pub fn new(subscribe_buffer: usize, publish_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                topics: HashMap::new(),
            })),
            dropped: Arc::new(AtomicU64::new(0)),
            publish_timeout,
            subscribe_buffer,
        }
    }

    async fn sender_for(&self, topic: &Topic) -> broadcast::Sender<EventEnvelope<T>> {
        {
            let inner = self.inner.read().await;
            if let Some(tx) = inner.topics.get(topic.0) {
                return tx.clone();
            }
        }
        let mut inner = self.inner.write().await;
        inner
            .topics
            .entry(topic.0)
            .or_insert_with(|| {
                debug!(target: "event_bus", topic = topic.0, "created topic");
                broadcast::channel(self.subscribe_buffer).0
            })
            .clone()
    }

    pub async fn publish(&self, topic: Topic, payload: T) {
        let tx = self.sender_for(&topic).await;
        let envelope = EventEnvelope {
            topic: topic.clone(),
            payload,
            ts_ms: current_ts_ms(),
        };
        let send = async move { tx.send(envelope).map(|_| ()) };
        match timeout(self.publish_timeout, send).await {
            Ok(Ok(())) => {
                debug!(target: "event_bus", topic = topic.0, "published");
            }
            Ok(Err(_)) => {
                // No subscribers is normal during startup and in tests
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(target: "event_bus", topic = topic.0, "no subscribers");
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(target: "event_bus", topic = topic.0, "publish timeout");
            }
        }
    }

    pub async fn subscribe(&self, topic: Topic) -> broadcast::Receiver<EventEnvelope<T>> {
        self.sender_for(&topic).await.subscribe()
    }

    /// Events that found no subscriber or timed out.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

fn current_ts_ms() -> u128 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_subscribe_basic() {
        let bus: EventBus<String> = EventBus::default();
        let mut rx = bus.subscribe(Topic("fix.applied")).await;
        bus.publish(Topic("fix.applied"), "fix-1".to_string()).await;
        let evt = rx.recv().await.expect("should receive");
        assert_eq!(evt.topic.0, "fix.applied");
        assert_eq!(evt.payload, "fix-1");
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_counted_not_fatal() {
        let bus: EventBus<u64> = EventBus::default();
        bus.publish(Topic("nobody.listens"), 7).await;
        assert_eq!(bus.dropped_count(), 1);
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_block_publisher() {
        let bus: EventBus<u64> = EventBus::new(1, Duration::from_millis(50));
        let mut rx = bus.subscribe(Topic("bp")).await;
        // Both publishes complete even though the subscriber never drained;
        // the oldest message is evicted rather than the publisher waiting.
        bus.publish(Topic("bp"), 1).await;
        bus.publish(Topic("bp"), 2).await;
        assert!(matches!(
            rx.recv().await,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(1))
        ));
        let latest = rx.recv().await.expect("recv latest");
        assert_eq!(latest.payload, 2);
    }
}
