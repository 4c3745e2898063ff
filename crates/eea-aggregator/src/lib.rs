// crates/eea-aggregator/src/lib.rs
// ============================================================================
// Crate: eea-aggregator
// Description: The Event Execution Aggregator's admission middleware (C2)
// and flush scheduler (C3): rate-limits entity execution by wrapping a
// downstream bus handler with a lock-or-defer decision, and periodically
// republishes deferred entities so they eventually execute.
// ============================================================================

//! ## Overview
//! [`AggregatorMiddleware`] sits in front of a downstream
//! [`BusHandler`](eea_core::interfaces::BusHandler) (typically the topic
//! feeding C4's ingest orchestrator) and decides, per envelope, whether to
//! forward it immediately or defer it to the flush queue. [`FlushScheduler`]
//! drains that queue on a timer and republishes each entry so it is retried.
//!
//! The decorator shape — a struct holding a trait object it wraps and
//! delegates to selectively — is adapted from `decision-gate-broker`'s sink
//! implementations (`sink/log.rs`'s `LogSink<W>`, `sink/channel.rs`'s
//! `ChannelSink`): both hold an inner collaborator behind a field and
//! forward to it under a condition. No literal request-middleware
//! abstraction exists in that codebase; the wrapping structure is
//! generalized from those sinks, while the admission algorithm itself
//! follows spec.md §4.2 and §4.3 directly against the
//! [`eea_core::interfaces`] store traits.

mod error;
mod scheduler;

use std::sync::Arc;

use async_trait::async_trait;
use eea_core::interfaces::BusError;
use eea_core::interfaces::BusHandler;
use eea_core::interfaces::EntityStore;
use eea_core::interfaces::FlushQueueStore;
use eea_core::interfaces::LockOutcome;
use eea_core::interfaces::LockStore;
use eea_core::entity::EntityEnvelope;

pub use error::AggregatorError;
pub use scheduler::FlushScheduler;

/// Topic a fresh upstream event or a republished flush entry is published
/// to; [`AggregatorMiddleware`] subscribes here.
pub const TOPIC_ENTITY_FLUSH: &str = "entity.flush";
/// Topic an admitted envelope is forwarded to once a lock has been
/// acquired; C4's ingest orchestrator subscribes here.
pub const TOPIC_ENTITY_EXECUTE: &str = "entity.execute";

/// Rate-limiting admission gate for entity executions (C2).
///
/// Wraps a downstream [`BusHandler`] and a store implementing
/// [`EntityStore`], [`LockStore`], and [`FlushQueueStore`]. Each delivered
/// envelope is admitted (forwarded to the downstream handler with a fresh
/// correlation id) or deferred (enqueued to the flush queue and absorbed),
/// per spec.md §4.2.
pub struct AggregatorMiddleware<S> {
    /// The store backing entity lookups, lock acquisition, and the flush
    /// queue.
    store: Arc<S>,
    /// The handler admitted envelopes are forwarded to.
    downstream: Arc<dyn BusHandler>,
    /// The cool-down interval, in seconds, a granted lock remains valid
    /// for.
    lock_interval_seconds: u32,
}

impl<S> AggregatorMiddleware<S>
where
    S: EntityStore + LockStore + FlushQueueStore + 'static,
{
    /// Builds a middleware admitting at most one execution per
    /// `lock_interval_seconds` for each entity.
    #[must_use]
    pub fn new(store: Arc<S>, downstream: Arc<dyn BusHandler>, lock_interval_seconds: u32) -> Self {
        Self { store, downstream, lock_interval_seconds }
    }
}

#[async_trait]
impl<S> BusHandler for AggregatorMiddleware<S>
where
    S: EntityStore + LockStore + FlushQueueStore + 'static,
{
    async fn handle(&self, envelope: EntityEnvelope) -> Result<(), BusError> {
        // Step 1: an entity deregistered between publish and delivery is a
        // terminal absorb, not a failure the caller should retry.
        match self.store.get_entity_by_id(&envelope.entity_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::debug!(entity_id = %envelope.entity_id, "entity absent, absorbing");
                return Ok(());
            }
            Err(source) => return Err(unavailable(source)),
        }

        // Step 2: attempt to acquire the evaluation lock.
        let outcome = self
            .store
            .lock_if_threshold_not_exceeded(&envelope.entity_id, self.lock_interval_seconds)
            .await
            .map_err(unavailable)?;

        match outcome {
            LockOutcome::Acquired(correlation_id) => {
                let envelope = envelope.with_correlation_id(correlation_id);
                self.downstream.handle(envelope).await
            }
            LockOutcome::NotApplicable => {
                self.store
                    .enqueue_flush(&envelope.entity_id, envelope.project_id)
                    .await
                    .map_err(unavailable)?;
                Ok(())
            }
        }
    }
}

/// Maps a recoverable [`StoreError`](eea_core::interfaces::StoreError) to
/// the [`BusError`] variant that causes redelivery.
fn unavailable(source: eea_core::interfaces::StoreError) -> BusError {
    BusError::Unavailable(source.to_string())
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
    use std::sync::atomic::Ordering;

    use eea_core::EntityType;
    use eea_core::identifiers::ProjectId;
    use eea_store_sqlite::SqliteStore;
    use eea_store_sqlite::SqliteStoreConfig;

    use super::*;

    struct CountingHandler {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl BusHandler for CountingHandler {
        async fn handle(&self, _envelope: EntityEnvelope) -> Result<(), BusError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn open_store() -> (Arc<SqliteStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("creates temp dir");
        let path = dir.path().join("eea.sqlite3");
        let store = SqliteStore::open(&SqliteStoreConfig::new(path)).expect("opens store");
        (Arc::new(store), dir)
    }

    #[tokio::test]
    async fn a_second_delivery_within_the_interval_is_deferred_not_forwarded() {
        let (store, _dir) = open_store().await;
        let entity = store
            .register_entity(EntityType::Repository, ProjectId::new(1).expect("non-zero"), BTreeMap::new())
            .await
            .expect("registers");

        let count = Arc::new(AtomicUsize::new(0));
        let downstream = Arc::new(CountingHandler { count: Arc::clone(&count) });
        let middleware = AggregatorMiddleware::new(Arc::clone(&store), downstream, 3600);

        let envelope = EntityEnvelope::build_message(
            entity.entity_type,
            entity.id.clone(),
            entity.properties.clone(),
            entity.project_id,
            entity.provider_id.clone(),
            eea_core::identifiers::SequenceNumber::new(1),
        );

        middleware.handle(envelope.clone()).await.expect("first delivery admits");
        middleware.handle(envelope).await.expect("second delivery defers");

        assert_eq!(count.load(Ordering::SeqCst), 1);
        let queued = store.list_flush_cache().await.expect("lists flush cache");
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].entity_id, entity.id);
    }

    #[tokio::test]
    async fn an_envelope_for_a_deregistered_entity_is_absorbed_without_error() {
        let (store, _dir) = open_store().await;
        let entity = store
            .register_entity(EntityType::Artifact, ProjectId::new(1).expect("non-zero"), BTreeMap::new())
            .await
            .expect("registers");
        store.deregister_entity(&entity.id).await.expect("deregisters");

        let count = Arc::new(AtomicUsize::new(0));
        let downstream = Arc::new(CountingHandler { count: Arc::clone(&count) });
        let middleware = AggregatorMiddleware::new(Arc::clone(&store), downstream, 3600);

        let envelope = EntityEnvelope::build_message(
            entity.entity_type,
            entity.id,
            entity.properties,
            entity.project_id,
            entity.provider_id,
            eea_core::identifiers::SequenceNumber::new(1),
        );

        middleware.handle(envelope).await.expect("absorbs silently");
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
