//! Event emitter.
//!
//! Constructs and dispatches one notification message per accepted
//! mutation, in commit order. Emission happens strictly after the
//! triggering mutation is durably committed; a failing transport never
//! rolls back the mutation. Failures are logged and counted, not retried.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::types::Event;

/// Default bound on a single publish attempt.
pub const DEFAULT_EMIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Error reported by a transport backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PublishError {
    /// Transport unavailable or rejected the message.
    #[error("transport error: {0}")]
    Transport(String),
    /// Publish attempt exceeded the configured bound.
    #[error("publish timed out after {0:?}")]
    Timeout(Duration),
}

/// Fire-and-forget message-bus client.
///
/// At-least-once delivery to the bus is the transport's responsibility,
/// not this trait's.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish one payload under `topic`.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError>;
}

/// Publisher that drops messages after logging them. Useful when no bus is
/// configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

#[async_trait]
impl Publisher for NoopPublisher {
    async fn publish(&self, topic: &str, _payload: &[u8]) -> Result<(), PublishError> {
        tracing::debug!(topic, "no messaging backend configured, dropping event");
        Ok(())
    }
}

/// Publisher that records messages in memory, for tests.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    messages: parking_lot::Mutex<Vec<(String, serde_json::Value)>>,
}

impl MemoryPublisher {
    /// Create an empty recording publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded (topic, payload) pairs in publish order.
    pub fn published(&self) -> Vec<(String, serde_json::Value)> {
        self.messages.lock().clone()
    }

    /// Recorded topics in publish order.
    pub fn topics(&self) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    /// Number of recorded messages.
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    /// True when nothing was published.
    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        let value = serde_json::from_slice(payload)
            .map_err(|e| PublishError::Transport(e.to_string()))?;
        self.messages.lock().push((topic.to_string(), value));
        Ok(())
    }
}

/// Publisher that always fails, for degradation tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingPublisher;

#[async_trait]
impl Publisher for FailingPublisher {
    async fn publish(&self, _topic: &str, _payload: &[u8]) -> Result<(), PublishError> {
        Err(PublishError::Transport("bus unavailable".to_string()))
    }
}

enum Mode {
    /// Publish inline from the calling task.
    Direct(Arc<dyn Publisher>),
    /// Enqueue to an in-process channel drained by a publisher task.
    /// Channel FIFO preserves commit order while decoupling request
    /// latency from bus availability.
    #[cfg(feature = "tokio")]
    Buffered(tokio::sync::mpsc::UnboundedSender<Event>),
}

/// Emits one event per committed mutation.
///
/// `emit` never fails: transport problems degrade to a log line and a
/// counter increment, because the triggering mutation already committed.
pub struct EventEmitter {
    mode: Mode,
    timeout: Duration,
    degraded: Arc<AtomicU64>,
}

impl EventEmitter {
    /// Emitter that publishes inline with a bounded timeout.
    pub fn direct(publisher: Arc<dyn Publisher>, timeout: Duration) -> Self {
        Self {
            mode: Mode::Direct(publisher),
            timeout,
            degraded: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emitter that enqueues events to a publisher task.
    ///
    /// Must be called from within a tokio runtime; the drain task lives
    /// until the emitter (and all queued events) are dropped.
    #[cfg(feature = "tokio")]
    pub fn buffered(publisher: Arc<dyn Publisher>, timeout: Duration) -> Self {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Event>();
        let degraded = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&degraded);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                publish_once(publisher.as_ref(), &event, timeout, &counter).await;
            }
        });
        Self {
            mode: Mode::Buffered(tx),
            timeout,
            degraded,
        }
    }

    /// Emit one event. Call strictly after the triggering mutation commits.
    pub async fn emit(&self, event: Event) {
        match &self.mode {
            Mode::Direct(publisher) => {
                publish_once(publisher.as_ref(), &event, self.timeout, &self.degraded).await;
            }
            #[cfg(feature = "tokio")]
            Mode::Buffered(tx) => {
                if tx.send(event).is_err() {
                    tracing::error!("event publisher task is gone, dropping event");
                    self.degraded.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Number of events that could not be handed to the transport.
    pub fn degraded_count(&self) -> u64 {
        self.degraded.load(Ordering::Relaxed)
    }
}

async fn publish_once(
    publisher: &dyn Publisher,
    event: &Event,
    timeout: Duration,
    degraded: &AtomicU64,
) {
    let topic = event.topic();
    let payload = match serde_json::to_vec(event) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(topic, error = %e, "cannot serialize event");
            degraded.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    let result = bounded_publish(publisher, topic, &payload, timeout).await;
    match result {
        Ok(()) => {
            tracing::debug!(topic, compose_id = %event.compose.id, "event published");
        }
        Err(e) => {
            // The mutation already committed; log and continue.
            tracing::error!(
                topic,
                compose_id = %event.compose.id,
                error = %e,
                "cannot publish event to bus"
            );
            degraded.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(feature = "tokio")]
async fn bounded_publish(
    publisher: &dyn Publisher,
    topic: &str,
    payload: &[u8],
    timeout: Duration,
) -> Result<(), PublishError> {
    match tokio::time::timeout(timeout, publisher.publish(topic, payload)).await {
        Ok(result) => result,
        Err(_) => Err(PublishError::Timeout(timeout)),
    }
}

#[cfg(not(feature = "tokio"))]
async fn bounded_publish(
    publisher: &dyn Publisher,
    topic: &str,
    payload: &[u8],
    _timeout: Duration,
) -> Result<(), PublishError> {
    publisher.publish(topic, payload).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Compose, ComposeId, ComposeInfo, ComposeType, COMPOSE_INFO_VERSION};

    fn compose() -> Compose {
        let compose_info = ComposeInfo {
            version: COMPOSE_INFO_VERSION.to_string(),
            release_short: "Fedora".to_string(),
            release_version: "Rawhide".to_string(),
            date: "20200517".to_string(),
            compose_type: ComposeType::Nightly,
            respin: 1,
            label: None,
            extra: serde_json::Map::new(),
        };
        Compose {
            id: ComposeId::new("Fedora-Rawhide-20200517.n.1"),
            builder: "odcs".to_string(),
            tags: vec![],
            parents: vec![],
            children: vec![],
            respin_of: None,
            respun_by: vec![],
            compose_info,
            compose_url: None,
        }
    }

    #[tokio::test]
    async fn test_direct_emit_publishes_to_topic() {
        let publisher = Arc::new(MemoryPublisher::new());
        let emitter = EventEmitter::direct(publisher.clone(), DEFAULT_EMIT_TIMEOUT);
        emitter.emit(Event::created(compose())).await;
        assert_eq!(publisher.topics(), vec!["compose-created"]);
        assert_eq!(emitter.degraded_count(), 0);
    }

    #[tokio::test]
    async fn test_emit_failure_degrades_without_error() {
        let emitter = EventEmitter::direct(Arc::new(FailingPublisher), DEFAULT_EMIT_TIMEOUT);
        emitter.emit(Event::created(compose())).await;
        emitter.emit(Event::tagged(compose(), "periodic", "alice")).await;
        assert_eq!(emitter.degraded_count(), 2);
    }

    #[cfg(feature = "tokio")]
    #[tokio::test]
    async fn test_buffered_emit_preserves_order() {
        let publisher = Arc::new(MemoryPublisher::new());
        let emitter = EventEmitter::buffered(publisher.clone(), DEFAULT_EMIT_TIMEOUT);
        emitter.emit(Event::created(compose())).await;
        emitter.emit(Event::tagged(compose(), "periodic", "alice")).await;
        emitter.emit(Event::untagged(compose(), "periodic", "bob")).await;

        // Drain task runs concurrently; give it a moment.
        for _ in 0..50 {
            if publisher.len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            publisher.topics(),
            vec!["compose-created", "compose-tagged", "compose-untagged"]
        );
    }
}
