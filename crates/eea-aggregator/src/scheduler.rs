//! The flush scheduler (C3): periodically republishes entities deferred by
//! [`crate::AggregatorMiddleware`] so they are retried.

use std::sync::Arc;
use std::time::Duration;

use eea_core::entity::EntityEnvelope;
use eea_core::identifiers::SequenceNumber;
use eea_core::interfaces::EntityStore;
use eea_core::interfaces::FlushQueueStore;
use eea_core::interfaces::MessageBus;
use tokio::sync::Notify;

use crate::AggregatorError;
use crate::TOPIC_ENTITY_FLUSH;

/// Synthesized sequence number stamped on every republished flush entry.
/// Stored entities do not retain the sequence number of the upstream event
/// that originally registered them, so a flush-originated envelope cannot
/// carry a meaningful one; downstream consumers use sequence numbers only
/// for causal reconstruction of fresh upstream events, never for ordering
/// within the core.
const FLUSH_SEQUENCE_NUMBER: SequenceNumber = SequenceNumber::new(0);

/// Drains the flush queue on a timer, republishing each entry onto the bus.
pub struct FlushScheduler<S, B: ?Sized> {
    /// The store backing entity lookups and the flush queue.
    store: Arc<S>,
    /// The bus entries are republished onto.
    bus: Arc<B>,
}

impl<S, B> FlushScheduler<S, B>
where
    S: EntityStore + FlushQueueStore,
    B: MessageBus + ?Sized,
{
    /// Builds a scheduler over `store`'s flush queue, publishing to `bus`.
    #[must_use]
    pub fn new(store: Arc<S>, bus: Arc<B>) -> Self {
        Self { store, bus }
    }

    /// Runs one drain pass: snapshots the flush queue, materializes and
    /// republishes each still-registered entity, and reports how many were
    /// republished.
    ///
    /// # Errors
    /// Returns [`AggregatorError`] if the store cannot be read or the bus
    /// cannot accept a publish; entries already processed in this pass are
    /// not rolled back, since a duplicate republish is absorbed by the
    /// aggregator's lock.
    pub async fn tick(&self) -> Result<usize, AggregatorError> {
        let entries = self.store.list_flush_cache().await?;
        let mut republished = 0;

        for entry in entries {
            // Claim before materializing: a queue entry for a deleted
            // entity is claimed and dropped here rather than left to be
            // claimed again on every future tick.
            let claimed = self.store.flush_cache(&entry.entity_id).await?;
            if !claimed {
                // Another scheduler instance (or a rapid successive tick)
                // already claimed this entry.
                continue;
            }

            let Some(entity) = self.store.get_entity_by_id(&entry.entity_id).await? else {
                tracing::debug!(entity_id = %entry.entity_id, "flushed entity no longer registered, dropping");
                continue;
            };

            let envelope = EntityEnvelope::build_message(
                entity.entity_type,
                entity.id,
                entity.properties,
                entity.project_id,
                entity.provider_id,
                FLUSH_SEQUENCE_NUMBER,
            );
            self.bus.publish(TOPIC_ENTITY_FLUSH, envelope).await?;
            republished += 1;
        }

        Ok(republished)
    }

    /// Runs [`tick`](Self::tick) every `interval` until `shutdown` fires,
    /// logging (rather than propagating) per-tick errors so one failed
    /// drain pass does not halt the scheduler.
    pub async fn run_periodic(&self, interval: Duration, shutdown: Arc<Notify>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                biased;
                () = shutdown.notified() => break,
                _ = ticker.tick() => {
                    if let Err(source) = self.tick().await {
                        tracing::error!(%source, "flush scheduler tick failed");
                    }
                }
            }
        }
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

    use eea_bus::InProcessBus;
    use eea_core::EntityType;
    use eea_core::identifiers::ProjectId;
    use eea_store_sqlite::SqliteStore;
    use eea_store_sqlite::SqliteStoreConfig;

    use super::*;

    async fn open_store() -> (Arc<SqliteStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("creates temp dir");
        let path = dir.path().join("eea.sqlite3");
        let store = SqliteStore::open(&SqliteStoreConfig::new(path)).expect("opens store");
        (Arc::new(store), dir)
    }

    #[tokio::test]
    async fn tick_drops_entries_for_entities_that_no_longer_exist() {
        let (store, _dir) = open_store().await;
        let entity = store
            .register_entity(EntityType::Repository, ProjectId::new(1).expect("non-zero"), BTreeMap::new())
            .await
            .expect("registers");
        store.enqueue_flush(&entity.id, entity.project_id).await.expect("enqueues");
        store.deregister_entity(&entity.id).await.expect("deregisters");

        let bus = Arc::new(InProcessBus::new());
        let scheduler = FlushScheduler::new(Arc::clone(&store), bus);

        let republished = scheduler.tick().await.expect("ticks");
        assert_eq!(republished, 0);
    }

    #[tokio::test]
    async fn tick_republishes_and_claims_each_entry_exactly_once() {
        let (store, _dir) = open_store().await;
        let entity = store
            .register_entity(EntityType::Repository, ProjectId::new(1).expect("non-zero"), BTreeMap::new())
            .await
            .expect("registers");
        store.enqueue_flush(&entity.id, entity.project_id).await.expect("enqueues");

        let bus = Arc::new(InProcessBus::new());
        let scheduler = FlushScheduler::new(Arc::clone(&store), Arc::clone(&bus));

        let first = scheduler.tick().await.expect("ticks");
        let second = scheduler.tick().await.expect("ticks again");

        assert_eq!(first, 1);
        assert_eq!(second, 0);
    }
}
