// crates/eea-bus/src/lib.rs
// ============================================================================
// Crate: eea-bus
// Description: In-process implementation of eea_core's MessageBus: one
// tokio mpsc channel per topic, delivered to a single subscribed handler
// with bounded at-least-once redelivery.
// ============================================================================

//! ## Overview
//! [`InProcessBus`] implements [`eea_core::interfaces::MessageBus`] for the
//! single-process deployment shape: each topic owns one
//! `tokio::sync::mpsc` channel and at most one subscribed
//! [`eea_core::interfaces::BusHandler`] (execute mode, per spec.md §6). A
//! handler returning `Err` causes the envelope to be retried up to
//! [`MAX_REDELIVERY_ATTEMPTS`] times before it is dropped and logged,
//! approximating at-least-once delivery without a durable broker.
//!
//! Grounded on `decision-gate-broker`'s `ChannelSink` (`sink/channel.rs`):
//! the same `tokio::sync::mpsc::Sender`/`try_send` delivery shape, extended
//! here with a receive-and-dispatch loop per topic since the broker's sink
//! only pushes, it never pulls.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use eea_core::entity::EntityEnvelope;
use eea_core::interfaces::BusError;
use eea_core::interfaces::BusHandler;
use eea_core::interfaces::MessageBus;
use tokio::sync::Notify;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Bounded channel capacity for each topic's mpsc queue.
pub const TOPIC_CHANNEL_CAPACITY: usize = 1024;
/// Maximum number of delivery attempts before an envelope is dropped.
pub const MAX_REDELIVERY_ATTEMPTS: u32 = 3;
/// Delay applied between redelivery attempts.
pub const REDELIVERY_BACKOFF: std::time::Duration = std::time::Duration::from_millis(50);

/// A single topic's channel halves and its (at most one) subscriber.
struct Topic {
    /// Clonable handle publishers send envelopes through.
    sender: mpsc::Sender<EntityEnvelope>,
    /// The receive half, taken by [`InProcessBus::spawn_topic_loop`] once `run` starts.
    receiver: Option<mpsc::Receiver<EntityEnvelope>>,
    /// The subscribed handler, if any; `None` means publishes queue but are never delivered.
    handler: Option<Arc<dyn BusHandler>>,
}

/// An in-process, single-subscriber-per-topic message bus.
pub struct InProcessBus {
    /// Topics keyed by name, created lazily on first publish or subscribe.
    topics: Mutex<HashMap<String, Topic>>,
    /// Whether `run` is currently dispatching.
    running: AtomicBool,
    /// Cooperative shutdown signal observed by every topic's dispatch loop.
    shutdown: Arc<Notify>,
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InProcessBus {
    /// Builds an empty bus with no topics registered.
    #[must_use]
    pub fn new() -> Self {
        Self { topics: Mutex::new(HashMap::new()), running: AtomicBool::new(false), shutdown: Arc::new(Notify::new()) }
    }

    /// Returns a clonable sender for `topic`, creating the topic if it doesn't exist yet.
    fn topic_sender(&self, topic: &str) -> Result<mpsc::Sender<EntityEnvelope>, BusError> {
        let mut topics = self.topics.lock().map_err(|_err| poisoned())?;
        let entry = topics.entry(topic.to_owned()).or_insert_with(new_topic);
        Ok(entry.sender.clone())
    }

    /// Spawns the receive-and-dispatch loop for one topic, exiting on shutdown or channel close.
    fn spawn_topic_loop(
        name: String,
        mut receiver: mpsc::Receiver<EntityEnvelope>,
        handler: Arc<dyn BusHandler>,
        shutdown: Arc<Notify>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let envelope = tokio::select! {
                    biased;
                    () = shutdown.notified() => break,
                    received = receiver.recv() => received,
                };
                let Some(envelope) = envelope else { break };
                deliver_with_retries(&name, &*handler, envelope).await;
            }
        })
    }
}

/// Builds a fresh, unsubscribed topic with its channel pair.
fn new_topic() -> Topic {
    let (sender, receiver) = mpsc::channel(TOPIC_CHANNEL_CAPACITY);
    Topic { sender, receiver: Some(receiver), handler: None }
}

/// Builds the error returned when the topic registry mutex is poisoned.
fn poisoned() -> BusError {
    BusError::Unavailable("topic registry lock poisoned".to_owned())
}

/// Delivers `envelope` to `handler`, retrying on error up to [`MAX_REDELIVERY_ATTEMPTS`].
async fn deliver_with_retries(topic: &str, handler: &dyn BusHandler, envelope: EntityEnvelope) {
    for attempt in 1..=MAX_REDELIVERY_ATTEMPTS {
        match handler.handle(envelope.clone()).await {
            Ok(()) => return,
            Err(source) if attempt < MAX_REDELIVERY_ATTEMPTS => {
                tracing::warn!(topic, attempt, %source, "handler failed, will redeliver");
                tokio::time::sleep(REDELIVERY_BACKOFF).await;
            }
            Err(source) => {
                tracing::error!(topic, attempt, %source, "handler failed, dropping envelope");
            }
        }
    }
}

#[async_trait]
impl MessageBus for InProcessBus {
    async fn publish(&self, topic: &str, envelope: EntityEnvelope) -> Result<(), BusError> {
        let sender = self.topic_sender(topic)?;
        sender
            .send(envelope)
            .await
            .map_err(|source| BusError::Unavailable(source.to_string()))
    }

    fn subscribe(&self, topic: &str, handler: Box<dyn BusHandler>) -> Result<(), BusError> {
        let mut topics = self.topics.lock().map_err(|_err| poisoned())?;
        let entry = topics.entry(topic.to_owned()).or_insert_with(new_topic);
        entry.handler = Some(Arc::from(handler));
        Ok(())
    }

    async fn run(&self) -> Result<(), BusError> {
        self.running.store(true, Ordering::SeqCst);
        let mut handles = Vec::new();
        {
            let mut topics = self.topics.lock().map_err(|_err| poisoned())?;
            for (name, topic) in topics.iter_mut() {
                let Some(handler) = topic.handler.clone() else { continue };
                let Some(receiver) = topic.receiver.take() else { continue };
                handles.push(Self::spawn_topic_loop(
                    name.clone(),
                    receiver,
                    handler,
                    Arc::clone(&self.shutdown),
                ));
            }
        }
        for handle in handles {
            let _ = handle.await;
        }
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), BusError> {
        self.shutdown.notify_waiters();
        Ok(())
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[allow(
    clippy::missing_docs_in_private_items,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only helpers keep documentation concise and use expect for setup assertions."
)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;

    use eea_core::EntityType;
    use eea_core::identifiers::EntityId;
    use eea_core::identifiers::ProjectId;
    use eea_core::identifiers::ProviderId;
    use eea_core::identifiers::SequenceNumber;

    use super::*;

    struct CountingHandler {
        /// Number of envelopes delivered so far.
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl BusHandler for CountingHandler {
        async fn handle(&self, _envelope: EntityEnvelope) -> Result<(), BusError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn sample_envelope() -> EntityEnvelope {
        EntityEnvelope::build_message(
            EntityType::Repository,
            EntityId::new("entity-1").expect("non-empty"),
            BTreeMap::new(),
            ProjectId::new(1).expect("non-zero"),
            ProviderId::new("github").expect("non-empty"),
            SequenceNumber::new(1),
        )
    }

    #[tokio::test]
    async fn published_envelopes_reach_the_subscribed_handler() {
        let bus = InProcessBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        bus.subscribe("entities", Box::new(CountingHandler { count: Arc::clone(&count) }))
            .expect("subscribes");

        bus.publish("entities", sample_envelope()).await.expect("publishes");
        let close_handle = {
            let bus = &bus;
            async {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                bus.close().await.expect("closes");
            }
        };
        let (bus_result, ()) = tokio::join!(bus.run(), close_handle);
        bus_result.expect("bus run");

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn subscribing_a_second_handler_replaces_the_first() {
        let bus = InProcessBus::new();
        let first_count = Arc::new(AtomicUsize::new(0));
        let second_count = Arc::new(AtomicUsize::new(0));
        bus.subscribe("entities", Box::new(CountingHandler { count: Arc::clone(&first_count) }))
            .expect("subscribes");
        bus.subscribe("entities", Box::new(CountingHandler { count: Arc::clone(&second_count) }))
            .expect("subscribes");

        bus.publish("entities", sample_envelope()).await.expect("publishes");
        let close_handle = {
            let bus = &bus;
            async {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                bus.close().await.expect("closes");
            }
        };
        let (bus_result, ()) = tokio::join!(bus.run(), close_handle);
        bus_result.expect("bus run");

        assert_eq!(first_count.load(Ordering::SeqCst), 0);
        assert_eq!(second_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn running_is_false_before_run_is_called() {
        let bus = InProcessBus::new();
        assert!(!bus.running());
    }
}
