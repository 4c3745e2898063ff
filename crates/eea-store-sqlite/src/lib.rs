// crates/eea-store-sqlite/src/lib.rs
// ============================================================================
// Crate: eea-store-sqlite
// Description: SQLite-backed implementation of eea_core's storage traits,
// serialized through a single writer thread.
// ============================================================================

//! ## Overview
//! Implements [`eea_core::interfaces::EntityStore`],
//! [`eea_core::interfaces::LockStore`], [`eea_core::interfaces::FlushQueueStore`],
//! and [`eea_core::interfaces::EvaluationHistory`] against one SQLite
//! database file. Every operation is funneled through a single dedicated
//! writer thread ([`writer::spawn_writer_thread`]) so the lock-acquire and
//! flush-enqueue pairing required by invariants I1/I2 can run inside one
//! `BEGIN IMMEDIATE … COMMIT` transaction without relying on SQLite's
//! weaker cross-connection isolation.
//!
//! Invariant I4 (cascade delete of lock/flush-queue/history rows on entity
//! deregistration) is enforced declaratively via `ON DELETE CASCADE`
//! foreign keys in [`schema::initialize_schema`], not in application code.

pub mod schema;
pub mod store;
pub mod writer;

pub use store::SqliteStore;
pub use store::SqliteStoreConfig;

#[cfg(test)]
#[allow(
    clippy::missing_docs_in_private_items,
    reason = "Test-only helpers keep documentation concise."
)]
mod tests {
    use std::collections::BTreeMap;

    use eea_core::EntityType;
    use eea_core::ProjectId;
    use eea_core::Verdict;
    use eea_core::entity::PropertyValue;
    use eea_core::interfaces::EntityStore;
    use eea_core::interfaces::EvaluationHistory;
    use eea_core::interfaces::FlushQueueStore;
    use eea_core::interfaces::LockOutcome;
    use eea_core::interfaces::LockStore;

    use super::SqliteStore;
    use super::SqliteStoreConfig;

    #[allow(clippy::expect_used, reason = "test setup")]
    fn open_store(dir: &tempfile::TempDir) -> SqliteStore {
        let config = SqliteStoreConfig::new(dir.path().join("eea.sqlite3"));
        SqliteStore::open(&config).expect("opens")
    }

    #[tokio::test]
    #[allow(clippy::expect_used, reason = "test assertions")]
    async fn lock_if_threshold_not_exceeded_rejects_a_second_lock_within_the_interval() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(&dir);
        let entity_id = eea_core::identifiers::EntityId::new("entity-1").expect("non-empty");

        let first =
            store.lock_if_threshold_not_exceeded(&entity_id, 3600).await.expect("locks");
        assert!(matches!(first, LockOutcome::Acquired(_)));

        let second =
            store.lock_if_threshold_not_exceeded(&entity_id, 3600).await.expect("locks");
        assert_eq!(second, LockOutcome::NotApplicable);
    }

    #[tokio::test]
    #[allow(clippy::expect_used, reason = "test assertions")]
    async fn enqueue_flush_is_idempotent_per_entity() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(&dir);
        let entity_id = eea_core::identifiers::EntityId::new("entity-2").expect("non-empty");
        let project_id = ProjectId::new(1).expect("non-zero");

        store.enqueue_flush(&entity_id, project_id).await.expect("enqueues");
        store.enqueue_flush(&entity_id, project_id).await.expect("enqueues again");

        let cache = store.list_flush_cache().await.expect("lists");
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    #[allow(clippy::expect_used, reason = "test assertions")]
    async fn flush_cache_is_claimed_by_exactly_one_caller() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(&dir);
        let entity_id = eea_core::identifiers::EntityId::new("entity-3").expect("non-empty");
        let project_id = ProjectId::new(1).expect("non-zero");
        store.enqueue_flush(&entity_id, project_id).await.expect("enqueues");

        let first_claim = store.flush_cache(&entity_id).await.expect("flushes");
        let second_claim = store.flush_cache(&entity_id).await.expect("flushes");
        assert!(first_claim);
        assert!(!second_claim);
    }

    #[tokio::test]
    #[allow(clippy::expect_used, reason = "test assertions")]
    async fn deregistering_an_entity_cascades_to_its_coordination_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(&dir);
        let mut properties = BTreeMap::new();
        properties.insert("name".to_owned(), PropertyValue::Str("octo/repo".to_owned()));
        let project_id = ProjectId::new(1).expect("non-zero");

        let entity = store
            .register_entity(EntityType::Repository, project_id, properties)
            .await
            .expect("registers");

        store
            .lock_if_threshold_not_exceeded(&entity.id, 3600)
            .await
            .expect("locks");
        store.enqueue_flush(&entity.id, project_id).await.expect("enqueues");

        store.deregister_entity(&entity.id).await.expect("deregisters");

        assert_eq!(store.get_lock(&entity.id).await.expect("reads lock"), None);
        let cache = store.list_flush_cache().await.expect("lists");
        assert!(cache.is_empty());
        assert_eq!(store.get_entity_by_id(&entity.id).await.expect("reads entity"), None);
    }

    #[tokio::test]
    #[allow(clippy::expect_used, reason = "test assertions")]
    async fn evaluation_history_overwrites_the_record_for_the_same_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = open_store(&dir);
        let entity_id = eea_core::identifiers::EntityId::new("entity-4").expect("non-empty");
        let profile_id = eea_core::identifiers::ProfileId::new(1).expect("non-zero");
        let rule_type_id = eea_core::identifiers::RuleTypeId::new(1).expect("non-zero");

        let first = eea_core::RuleEvaluationRecord {
            profile_id,
            rule_type_id,
            entity_id: entity_id.clone(),
            verdict: Verdict::Passed,
            detail: eea_core::EvaluationDetail::default(),
            evaluated_at: 1,
            alert_metadata: None,
            remediation_metadata: None,
        };
        store.record(first).await.expect("records");

        let second = eea_core::RuleEvaluationRecord {
            profile_id,
            rule_type_id,
            entity_id: entity_id.clone(),
            verdict: Verdict::Failed,
            detail: eea_core::EvaluationDetail::default(),
            evaluated_at: 2,
            alert_metadata: Some(serde_json::json!({"alert_id": "a-1"})),
            remediation_metadata: None,
        };
        store.record(second).await.expect("records");

        let latest = store
            .get_latest(profile_id, rule_type_id, &entity_id)
            .await
            .expect("reads")
            .expect("present");
        assert_eq!(latest.verdict, Verdict::Failed);
        assert_eq!(latest.evaluated_at, 2);
    }
}
