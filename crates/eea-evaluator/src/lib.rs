// crates/eea-evaluator/src/lib.rs
// ============================================================================
// Crate: eea-evaluator
// Description: The Rule Evaluation & Action Pipeline's ingest orchestration,
// data-source registry, predicate execution, and per-rule state machine
// (C4).
// ============================================================================

//! ## Overview
//! [`RuleEvaluator`] is the pipeline's entry point: given an entity
//! envelope, it looks up every profile that applies to the envelope's
//! entity type ([`catalog::RuleCatalog`]), and for each rule type the
//! profile references, ingests the data the predicate needs
//! ([`ingest::IngestSource`]), compiles and runs the predicate against a
//! combined sandbox/data-source registry ([`registry::DataSourceRegistry`],
//! [`registry::CompositeRegistry`]), and hands the verdict to an action
//! dispatcher ([`dispatch::ActionDispatch`]) before recording the outcome.
//!
//! [`registry::DataSourceRegistry`] is adapted from
//! `decision-gate-providers`'s `ProviderRegistry`: a name-keyed map of
//! boxed trait objects with a pre-flight pass that checks every name a
//! rule type declares is actually registered before any predicate runs.
//! The catalog, ingest, and dispatch traits are each a seam this crate
//! defines for an external collaborator, mirroring how
//! `eea_core::interfaces` defines the store and bus traits its own
//! consumers implement.

mod catalog;
mod dispatch;
mod error;
mod evaluator;
mod ingest;
mod registry;

use async_trait::async_trait;
use eea_core::entity::EntityEnvelope;
use eea_core::interfaces::BusError;
use eea_core::interfaces::BusHandler;

pub use catalog::RuleCatalog;
pub use catalog::StaticCatalog;
pub use dispatch::ActionDispatch;
pub use dispatch::DispatchOutcome;
pub use dispatch::NoopDispatch;
pub use error::EvaluatorError;
pub use evaluator::RuleEvaluator;
pub use ingest::Ingested;
pub use ingest::IngestSource;
pub use ingest::PropertiesOnlyIngest;
pub use registry::CompositeRegistry;
pub use registry::DataSource;
pub use registry::DataSourceRegistry;

/// Topic a lock-admitted envelope is delivered on; matches
/// `eea_aggregator::TOPIC_ENTITY_EXECUTE`, kept as a local constant so this
/// crate does not need to depend on the aggregator crate for one string.
pub const TOPIC_ENTITY_EXECUTE: &str = "entity.execute";

#[async_trait]
impl BusHandler for RuleEvaluator {
    async fn handle(&self, envelope: EntityEnvelope) -> Result<(), BusError> {
        self.evaluate_envelope(&envelope)
            .await
            .map(|_records| ())
            .map_err(|error| BusError::Unavailable(error.to_string()))
    }
}
