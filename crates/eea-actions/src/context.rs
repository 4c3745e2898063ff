//! Shared Action Context (C7): a per-evaluation registry that lets rules
//! batch their contributions to an aggregating action so the dispatcher
//! issues one external call per evaluation instead of one per rule.
//!
//! The canonical use is PR-comment coalescing (spec.md §4.7): each failing
//! rule registers one comment fragment under the key
//! [`PULL_REQUEST_COMMENT_KEY`], and [`crate::handlers::PrCommentFlusher`]
//! emits a single aggregate review at evaluation end.
//!
//! The map-of-boxed-handlers shape is adapted from
//! `decision-gate-broker::broker::CompositeBroker`'s `sources` field: a
//! `BTreeMap` from a string key to an `Arc<dyn Trait>`, built up by
//! registration calls and consulted later by a dispatch step. Here the
//! registry also accumulates a `Vec` of items per key, since the whole
//! point of this seam is batching rather than one-shot resolution.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use eea_core::FlusherKey;

/// The flusher key PR-comment contributions are registered under.
pub const PULL_REQUEST_COMMENT_KEY: &str = "pull_request_comment";

/// A batched action flusher: consumes every item registered under its key
/// across one evaluation's rules and issues at most one external call.
#[async_trait]
pub trait AggregatingFlusher: Send + Sync {
    /// Flushes every item registered under this flusher's key for one
    /// evaluation.
    ///
    /// # Errors
    /// Returns a human-readable failure description; a failure here does
    /// not roll back the rule evaluations the items describe.
    async fn flush(&self, entity_id: &eea_core::EntityId, items: Vec<serde_json::Value>) -> Result<(), String>;
}

/// Per-evaluation mutable registry mapping a flusher key to its flusher
/// and the items registered against it so far.
///
/// Mutated under a `std::sync::Mutex` rather than an async lock: every
/// critical section is a short, non-blocking map insert, so holding the
/// std lock across an `.await` never arises (spec.md §4.7: "thread-safe
/// under parallel rule execution within one evaluation").
#[derive(Default)]
pub struct SharedActionContext {
    /// Registered flushers and their accumulated items, keyed by flusher
    /// key.
    entries: Mutex<BTreeMap<FlusherKey, (Arc<dyn AggregatingFlusher>, Vec<serde_json::Value>)>>,
}

impl SharedActionContext {
    /// Builds an empty context for one evaluation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `item` under `key`, installing `flusher` as the key's
    /// handler if this is the first registration for it.
    ///
    /// # Panics
    /// Never panics in practice; a poisoned lock is treated as an empty
    /// registry rather than propagated, since losing batched items on a
    /// prior panic is preferable to poisoning every subsequent rule's
    /// registration for the rest of the evaluation.
    pub fn share_and_register(
        &self,
        key: FlusherKey,
        flusher: Arc<dyn AggregatingFlusher>,
        item: serde_json::Value,
    ) {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.entry(key).or_insert_with(|| (flusher, Vec::new())).1.push(item);
    }

    /// Flushes every registered flusher against its accumulated items.
    ///
    /// Best-effort across keys (spec.md §4.7): one flusher's failure does
    /// not prevent the others from running. Every failure is collected
    /// and joined into a single error message.
    ///
    /// # Errors
    /// Returns a newline-joined message if any flusher failed.
    pub async fn flush_all(&self, entity_id: &eea_core::EntityId) -> Result<(), String> {
        let drained: Vec<_> = {
            let mut entries = match self.entries.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::take(&mut *entries).into_values().collect()
        };

        let mut failures = Vec::new();
        for (flusher, items) in drained {
            if items.is_empty() {
                continue;
            }
            if let Err(reason) = flusher.flush(entity_id, items).await {
                failures.push(reason);
            }
        }

        if failures.is_empty() { Ok(()) } else { Err(failures.join("; ")) }
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
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use super::*;

    struct CountingFlusher {
        calls: Arc<AtomicUsize>,
        items_seen: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AggregatingFlusher for CountingFlusher {
        async fn flush(&self, _entity_id: &eea_core::EntityId, items: Vec<serde_json::Value>) -> Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.items_seen.fetch_add(items.len(), Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingFlusher;

    #[async_trait]
    impl AggregatingFlusher for FailingFlusher {
        async fn flush(&self, _entity_id: &eea_core::EntityId, _items: Vec<serde_json::Value>) -> Result<(), String> {
            Err("boom".to_owned())
        }
    }

    #[tokio::test]
    async fn registrations_under_one_key_are_flushed_exactly_once() {
        let context = SharedActionContext::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let items_seen = Arc::new(AtomicUsize::new(0));
        let flusher: Arc<dyn AggregatingFlusher> =
            Arc::new(CountingFlusher { calls: Arc::clone(&calls), items_seen: Arc::clone(&items_seen) });

        let entity_id = eea_core::EntityId::new("e1").expect("non-empty");
        let key = FlusherKey::new(PULL_REQUEST_COMMENT_KEY).expect("non-empty");
        context.share_and_register(key.clone(), Arc::clone(&flusher), serde_json::json!("a"));
        context.share_and_register(key, flusher, serde_json::json!("b"));

        context.flush_all(&entity_id).await.expect("flushes");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(items_seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn a_failing_flusher_does_not_prevent_others_from_running() {
        let context = SharedActionContext::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let items_seen = Arc::new(AtomicUsize::new(0));
        let ok_flusher: Arc<dyn AggregatingFlusher> =
            Arc::new(CountingFlusher { calls: Arc::clone(&calls), items_seen: Arc::clone(&items_seen) });
        let failing_flusher: Arc<dyn AggregatingFlusher> = Arc::new(FailingFlusher);

        let entity_id = eea_core::EntityId::new("e1").expect("non-empty");
        context.share_and_register(
            FlusherKey::new("ok").expect("non-empty"),
            ok_flusher,
            serde_json::json!("a"),
        );
        context.share_and_register(
            FlusherKey::new("bad").expect("non-empty"),
            failing_flusher,
            serde_json::json!("b"),
        );

        let result = context.flush_all(&entity_id).await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn flushing_twice_only_issues_calls_for_fresh_registrations() {
        let context = SharedActionContext::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let items_seen = Arc::new(AtomicUsize::new(0));
        let flusher: Arc<dyn AggregatingFlusher> =
            Arc::new(CountingFlusher { calls: Arc::clone(&calls), items_seen: Arc::clone(&items_seen) });

        let entity_id = eea_core::EntityId::new("e1").expect("non-empty");
        let key = FlusherKey::new(PULL_REQUEST_COMMENT_KEY).expect("non-empty");
        context.share_and_register(key, flusher, serde_json::json!("a"));

        context.flush_all(&entity_id).await.expect("first flush");
        context.flush_all(&entity_id).await.expect("second flush is a no-op");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
