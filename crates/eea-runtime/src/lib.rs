// crates/eea-runtime/src/lib.rs
// ============================================================================
// Crate: eea-runtime
// Description: Wires the Event Execution Aggregator and Rule Evaluation &
// Action Pipeline's collaborators together behind the two downstream
// operations spec.md §6 exposes: register_consumer and flush_all.
// ============================================================================

//! ## Overview
//! [`Runtime`] owns one entity store, one rule catalog, one action
//! dispatcher, and the aggregator/evaluator pair built from them. It
//! exposes exactly the two operations spec.md §6 calls out for downstream
//! collaborators: [`Runtime::register_consumer`] subscribes the admission
//! gate and the rule evaluator to their topics on a given bus, and
//! [`Runtime::flush_all`] drains the flush queue once, synchronously,
//! for administrative use (a CLI command, a health endpoint) rather than
//! waiting on [`eea_aggregator::FlushScheduler`]'s timer.
//!
//! Grounded on `decision-gate-core::runtime::engine::ControlPlane`'s
//! shape: a struct generic over its collaborators, assembled once via
//! `new`, exposing a handful of narrow operations rather than a god
//! object. Unlike `ControlPlane`, `Runtime` is generic over the store
//! type alone (`S`): the bus, catalog, and action dispatcher are already
//! behind `eea_core::interfaces` trait objects, so threading extra type
//! parameters through for them would buy nothing.

mod error;
pub mod provider;

use std::sync::Arc;
use std::time::Duration;

use eea_aggregator::AggregatorMiddleware;
use eea_aggregator::FlushScheduler;
use eea_aggregator::TOPIC_ENTITY_EXECUTE;
use eea_aggregator::TOPIC_ENTITY_FLUSH;
use eea_core::interfaces::BusHandler;
use eea_core::interfaces::EntityStore;
use eea_core::interfaces::EvaluationHistory;
use eea_core::interfaces::FlushQueueStore;
use eea_core::interfaces::LockStore;
use eea_core::interfaces::MessageBus;
use eea_evaluator::DataSourceRegistry;
use eea_evaluator::IngestSource;
use eea_evaluator::RuleCatalog;
use eea_evaluator::RuleEvaluator;

pub use error::RuntimeError;

/// Every collaborator [`Runtime`] wires together, built once at startup
/// and shared for the process's lifetime.
pub struct Runtime<S> {
    /// The admission gate (C2), wrapping the rule evaluator.
    aggregator: Arc<AggregatorMiddleware<S>>,
    /// The rule evaluator (C4), subscribed directly to executed envelopes.
    evaluator: Arc<RuleEvaluator>,
    /// The flush-queue drain (C3), shared between the periodic background
    /// task and administrative [`Runtime::flush_all`] calls.
    scheduler: Arc<FlushScheduler<S, dyn MessageBus>>,
    /// How often [`Runtime::run_flush_scheduler`] drains the flush queue.
    flush_poll_interval: Duration,
}

impl<S> Runtime<S>
where
    S: EntityStore + LockStore + FlushQueueStore + EvaluationHistory + 'static,
{
    /// Assembles a runtime from its collaborators.
    ///
    /// `dispatch` and `ingest` are the action-dispatch and ingest seams
    /// (C6/C7 and ingest orchestration respectively); `catalog` is the
    /// profile/rule-type lookup; `data_sources` are the named `ds.*`
    /// helpers predicates may call.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        bus: Arc<dyn MessageBus>,
        catalog: Arc<dyn RuleCatalog>,
        data_sources: Arc<DataSourceRegistry>,
        ingest: Arc<dyn IngestSource>,
        dispatch: Arc<dyn eea_evaluator::ActionDispatch>,
        config: &eea_config::EeaConfig,
    ) -> Self {
        let evaluator = Arc::new(RuleEvaluator::new(
            catalog,
            data_sources,
            ingest,
            dispatch,
            Arc::clone(&store) as Arc<dyn EvaluationHistory>,
            Duration::from_millis(config.actions.dispatch_timeout_ms),
        ));
        let aggregator = Arc::new(AggregatorMiddleware::new(
            Arc::clone(&store),
            Arc::clone(&evaluator) as Arc<dyn BusHandler>,
            config.aggregator.lock_interval_seconds,
        ));
        let scheduler = Arc::new(FlushScheduler::new(store, bus));

        Self {
            aggregator,
            evaluator,
            scheduler,
            flush_poll_interval: Duration::from_millis(config.aggregator.flush_poll_interval_ms),
        }
    }

    /// Subscribes the admission gate and the rule evaluator to their
    /// topics on `bus` (spec.md §6's `register_consumer`).
    ///
    /// # Errors
    /// Returns [`RuntimeError::Bus`] if either subscription is rejected.
    pub fn register_consumer(&self, bus: &dyn MessageBus) -> Result<(), RuntimeError> {
        bus.subscribe(TOPIC_ENTITY_FLUSH, Box::new(AggregatorHandler { inner: Arc::clone(&self.aggregator) }))?;
        bus.subscribe(TOPIC_ENTITY_EXECUTE, Box::new(EvaluatorHandler { inner: Arc::clone(&self.evaluator) }))?;
        Ok(())
    }

    /// Runs the flush scheduler's periodic drain until `shutdown` fires.
    /// Intended to run concurrently with the bus's own dispatch loop
    /// (e.g. via `tokio::join!`).
    pub async fn run_flush_scheduler(&self, shutdown: Arc<tokio::sync::Notify>) {
        self.scheduler.run_periodic(self.flush_poll_interval, shutdown).await;
    }

    /// Drains the flush queue once, synchronously, republishing every
    /// still-registered entity and returning how many were republished
    /// (spec.md §6's administrative `flush_all`).
    ///
    /// Unlike [`Runtime::run_flush_scheduler`], this runs a single pass
    /// rather than ticking forever; callers that want a full drain of a
    /// queue larger than one pass should call this in a loop until it
    /// returns `0`.
    ///
    /// # Errors
    /// Returns [`RuntimeError::Aggregator`] if the store cannot be read or
    /// the bus cannot accept a republish.
    pub async fn flush_all(&self) -> Result<usize, RuntimeError> {
        self.scheduler.tick().await.map_err(RuntimeError::from)
    }
}

/// Adapts `Arc<AggregatorMiddleware<S>>` to the `Box<dyn BusHandler>`
/// [`MessageBus::subscribe`] expects, since the aggregator crate's
/// middleware is generic over its store and so cannot itself be boxed as
/// a trait object without naming `S`.
struct AggregatorHandler<S> {
    /// The wrapped middleware every delivered envelope is forwarded to.
    inner: Arc<AggregatorMiddleware<S>>,
}

#[async_trait::async_trait]
impl<S> BusHandler for AggregatorHandler<S>
where
    S: EntityStore + LockStore + FlushQueueStore + 'static,
{
    async fn handle(&self, envelope: eea_core::entity::EntityEnvelope) -> Result<(), eea_core::interfaces::BusError> {
        self.inner.handle(envelope).await
    }
}

/// Adapts `Arc<RuleEvaluator>` to `Box<dyn BusHandler>` for subscription,
/// mirroring [`AggregatorHandler`].
struct EvaluatorHandler {
    /// The wrapped evaluator every delivered envelope is forwarded to.
    inner: Arc<RuleEvaluator>,
}

#[async_trait::async_trait]
impl BusHandler for EvaluatorHandler {
    async fn handle(&self, envelope: eea_core::entity::EntityEnvelope) -> Result<(), eea_core::interfaces::BusError> {
        self.inner.handle(envelope).await
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

    use eea_actions::ActionDispatcher;
    use eea_bus::InProcessBus;
    use eea_core::EntityType;
    use eea_core::ProjectId;
    use eea_core::Verdict;
    use eea_core::identifiers::RuleTypeId;
    use eea_core::profile::ActionSwitch;
    use eea_core::rule_type::ActionConfig;
    use eea_core::rule_type::IngestSpec;
    use eea_core::rule_type::OutputFormat;
    use eea_core::rule_type::PredicateFlavour;
    use eea_core::rule_type::Severity;
    use eea_evaluator::PropertiesOnlyIngest;
    use eea_evaluator::StaticCatalog;
    use eea_store_sqlite::SqliteStore;
    use eea_store_sqlite::SqliteStoreConfig;

    use super::*;
    use crate::provider::LoggingProviderClient;

    async fn open_store() -> (Arc<SqliteStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("creates temp dir");
        let path = dir.path().join("eea.sqlite3");
        let store = SqliteStore::open(&SqliteStoreConfig::new(path)).expect("opens store");
        (Arc::new(store), dir)
    }

    fn always_passing_rule_type() -> eea_core::RuleType {
        eea_core::RuleType {
            id: RuleTypeId::new(1).expect("non-zero"),
            display_name: "always passes".to_owned(),
            guidance: String::new(),
            ingest: IngestSpec::default(),
            predicate_flavour: PredicateFlavour::DenyByDefault,
            predicate: "allow { true }".to_owned(),
            actions: ActionConfig::default(),
            severity: Severity::Low,
            output_format: OutputFormat::Text,
            extra: serde_json::Map::new(),
        }
    }

    fn catalog_with_profile(project_id: ProjectId) -> Arc<dyn RuleCatalog> {
        let rule_type = always_passing_rule_type();
        let profile = eea_core::Profile {
            id: eea_core::ProfileId::new(1).expect("non-zero"),
            project_id,
            entity_types: vec![EntityType::Repository],
            rule_types: vec![eea_core::RuleTypeRef { rule_type_id: rule_type.id, parameters: serde_json::Map::new() }],
            action_switches: BTreeMap::from([(eea_core::profile::ActionKind::Advisory, ActionSwitch::On)]),
        };
        Arc::new(StaticCatalog::new(vec![profile], vec![rule_type]))
    }

    fn build_runtime(store: Arc<SqliteStore>, bus: Arc<dyn MessageBus>, project_id: ProjectId) -> Runtime<SqliteStore> {
        let dispatcher =
            ActionDispatcher::new(Arc::new(LoggingProviderClient), Arc::new(eea_actions::LoggingRemediator));
        let config = eea_config::EeaConfig::default();
        Runtime::new(
            store,
            bus,
            catalog_with_profile(project_id),
            Arc::new(DataSourceRegistry::new()),
            Arc::new(PropertiesOnlyIngest),
            Arc::new(dispatcher),
            &config,
        )
    }

    #[tokio::test]
    async fn register_consumer_wires_a_fresh_envelope_through_to_a_recorded_evaluation() {
        let (store, _dir) = open_store().await;
        let project_id = ProjectId::new(1).expect("non-zero");
        let entity = store
            .register_entity(EntityType::Repository, project_id, BTreeMap::new())
            .await
            .expect("registers");

        let bus: Arc<dyn MessageBus> = Arc::new(InProcessBus::new());
        let runtime = build_runtime(Arc::clone(&store), Arc::clone(&bus), project_id);
        runtime.register_consumer(bus.as_ref()).expect("subscribes");

        let envelope = eea_core::entity::EntityEnvelope::build_message(
            entity.entity_type,
            entity.id.clone(),
            entity.properties.clone(),
            entity.project_id,
            entity.provider_id.clone(),
            eea_core::identifiers::SequenceNumber::new(1),
        );
        bus.publish(TOPIC_ENTITY_FLUSH, envelope).await.expect("publishes");

        let bus_for_close = Arc::clone(&bus);
        let close_after_delivery = async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            bus_for_close.close().await.expect("closes");
        };
        let (bus_result, ()) = tokio::join!(bus.run(), close_after_delivery);
        bus_result.expect("bus run");

        let rule_type_id = RuleTypeId::new(1).expect("non-zero");
        let profile_id = eea_core::ProfileId::new(1).expect("non-zero");
        let record = store
            .get_latest(profile_id, rule_type_id, &entity.id)
            .await
            .expect("reads history")
            .expect("a record was written");
        assert_eq!(record.verdict, Verdict::Passed);
    }

    #[tokio::test]
    async fn flush_all_drains_one_queued_entry_and_reports_it() {
        let (store, _dir) = open_store().await;
        let project_id = ProjectId::new(1).expect("non-zero");
        let entity = store
            .register_entity(EntityType::Repository, project_id, BTreeMap::new())
            .await
            .expect("registers");
        store.enqueue_flush(&entity.id, project_id).await.expect("enqueues");

        let bus: Arc<dyn MessageBus> = Arc::new(InProcessBus::new());
        let runtime = build_runtime(Arc::clone(&store), bus, project_id);

        let republished = runtime.flush_all().await.expect("drains");
        assert_eq!(republished, 1);

        let second_pass = runtime.flush_all().await.expect("drains again");
        assert_eq!(second_pass, 0);
    }
}
