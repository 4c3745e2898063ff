//! Trait interfaces for the core's external collaborators: the persistent
//! store (split into per-table traits), the message bus, and provider
//! clients. Concrete implementations live in `eea-store-sqlite`,
//! `eea-bus`, and integration-specific crates respectively; the core only
//! depends on these traits.

use async_trait::async_trait;
use thiserror::Error;

use crate::entity::Entity;
use crate::entity::EntityEnvelope;
use crate::entity::EntityType;
use crate::entity::PropertyMap;
use crate::identifiers::CorrelationId;
use crate::identifiers::EntityId;
use crate::identifiers::ProfileId;
use crate::identifiers::ProjectId;
use crate::identifiers::RuleTypeId;
use crate::record::EvaluationLock;
use crate::record::FlushQueueEntry;
use crate::record::RuleEvaluationRecord;

/// Errors surfaced by persistent-store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested entity does not exist. Terminal: callers must absorb
    /// rather than retry.
    #[error("entity not found: {0}")]
    EntityNotFound(EntityId),

    /// The store backend is temporarily unavailable; callers should
    /// negative-acknowledge so the triggering message redelivers.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be decoded.
    #[error("store decode error: {0}")]
    Decode(String),
}

/// Read access to registered entities and their property maps.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Fetches an entity by id, returning `Ok(None)` if it does not exist
    /// (as opposed to erroring) so callers such as the aggregator can
    /// absorb a deleted-entity result without treating it as a failure.
    async fn get_entity_by_id(&self, entity_id: &EntityId) -> Result<Option<Entity>, StoreError>;

    /// Registers a new entity, returning its properties as stored.
    async fn register_entity(
        &self,
        entity_type: EntityType,
        project_id: ProjectId,
        properties: PropertyMap,
    ) -> Result<Entity, StoreError>;

    /// Deregisters an entity, cascading to its flush queue entry,
    /// evaluation lock, and rule evaluation records (invariant I4).
    async fn deregister_entity(&self, entity_id: &EntityId) -> Result<(), StoreError>;
}

/// The outcome of an attempted lock acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    /// A fresh lock row was inserted; evaluation may proceed.
    Acquired(CorrelationId),
    /// An unexpired lock already exists; the caller must defer.
    NotApplicable,
}

/// Evaluation-lock coordination (invariant I1).
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Attempts to insert an Evaluation Lock row for `entity_id`, succeeding
    /// only if no row exists or the existing row has expired. Must run
    /// inside the same transaction as any paired flush-queue write so that
    /// a lost-lock race cannot leave both records absent.
    async fn lock_if_threshold_not_exceeded(
        &self,
        entity_id: &EntityId,
        interval_seconds: u32,
    ) -> Result<LockOutcome, StoreError>;

    /// Returns the current lock row for an entity, if any.
    async fn get_lock(&self, entity_id: &EntityId) -> Result<Option<EvaluationLock>, StoreError>;
}

/// Flush-queue coordination (invariant I2).
#[async_trait]
pub trait FlushQueueStore: Send + Sync {
    /// Inserts a Flush Queue Entry for `entity_id`, doing nothing if one
    /// already exists.
    async fn enqueue_flush(
        &self,
        entity_id: &EntityId,
        project_id: ProjectId,
    ) -> Result<(), StoreError>;

    /// Returns a snapshot of all queued flush entries.
    async fn list_flush_cache(&self) -> Result<Vec<FlushQueueEntry>, StoreError>;

    /// Atomically deletes the flush queue entry for `entity_id`, returning
    /// whether a row was actually deleted (a `false` result means another
    /// flusher already claimed it).
    async fn flush_cache(&self, entity_id: &EntityId) -> Result<bool, StoreError>;
}

/// Append-only evaluation history (C8).
#[async_trait]
pub trait EvaluationHistory: Send + Sync {
    /// Writes a rule evaluation record, overwriting any prior record for
    /// the same `(profile_id, rule_type_id, entity_id)` key.
    async fn record(&self, record: RuleEvaluationRecord) -> Result<(), StoreError>;

    /// Returns the most recent record for a key without scanning, used by
    /// the action dispatcher for state reconciliation.
    async fn get_latest(
        &self,
        profile_id: ProfileId,
        rule_type_id: RuleTypeId,
        entity_id: &EntityId,
    ) -> Result<Option<RuleEvaluationRecord>, StoreError>;
}

/// Errors surfaced by the message bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus backend could not accept or deliver a message; the
    /// triggering envelope should be negative-acknowledged for redelivery.
    #[error("bus unavailable: {0}")]
    Unavailable(String),

    /// A payload could not be decoded into an envelope.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

/// Logical pub/sub transport with at-least-once delivery and a
/// single-subscriber-per-topic execute mode. Implemented in-process by
/// `eea-bus`; external collaborators may substitute a durable broker.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes an envelope to a topic.
    async fn publish(&self, topic: &str, envelope: EntityEnvelope) -> Result<(), BusError>;

    /// Subscribes a handler to a topic. Only one handler may be registered
    /// per topic in execute mode; registering a second handler for the
    /// same topic replaces the first.
    fn subscribe(
        &self,
        topic: &str,
        handler: Box<dyn BusHandler>,
    ) -> Result<(), BusError>;

    /// Runs the bus's dispatch loop until `close` is called or the
    /// supplied cancellation signal fires.
    async fn run(&self) -> Result<(), BusError>;

    /// Signals the dispatch loop to stop and drains in-flight deliveries.
    async fn close(&self) -> Result<(), BusError>;

    /// Returns whether the dispatch loop is currently running.
    fn running(&self) -> bool;
}

/// A topic handler registered with a [`MessageBus`].
#[async_trait]
pub trait BusHandler: Send + Sync {
    /// Handles one delivered envelope. Returning `Err` causes a negative
    /// acknowledgement (redelivery); returning `Ok` acknowledges receipt.
    async fn handle(&self, envelope: EntityEnvelope) -> Result<(), BusError>;
}

/// Errors surfaced by provider client operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider returned a client-class error (4xx-equivalent);
    /// terminal, should not be retried.
    #[error("provider rejected request: {0}")]
    Rejected(String),

    /// The provider returned a server-class error (5xx-equivalent);
    /// recoverable, should be retried.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The referenced resource does not exist on the provider. Treated as
    /// success when closing an already-closed alert.
    #[error("provider resource not found")]
    NotFound,
}

/// Upstream-provider operations consumed by the ingest phase and the
/// action dispatcher. One implementation exists per provider (GitHub,
/// DockerHub, OCI registries, ...); none are specified here.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Registers an entity with the provider, returning its canonical
    /// property map.
    async fn register_entity(
        &self,
        entity_type: EntityType,
        properties: PropertyMap,
    ) -> Result<PropertyMap, ProviderError>;

    /// Deregisters an entity from the provider.
    async fn deregister_entity(
        &self,
        entity_type: EntityType,
        properties: &PropertyMap,
    ) -> Result<(), ProviderError>;

    /// Re-fetches all operational properties for an entity.
    async fn retrieve_all_properties(
        &self,
        entity_type: EntityType,
        properties: &PropertyMap,
    ) -> Result<PropertyMap, ProviderError>;

    /// Creates a review/comment on a pull request, returning its opaque
    /// provider-assigned identifier.
    async fn create_review(
        &self,
        entity_id: &EntityId,
        body: &str,
    ) -> Result<String, ProviderError>;

    /// Dismisses a previously created review.
    async fn dismiss_review(
        &self,
        entity_id: &EntityId,
        review_id: &str,
    ) -> Result<(), ProviderError>;

    /// Opens a security advisory, returning its opaque provider-assigned
    /// identifier.
    async fn create_security_advisory(
        &self,
        entity_id: &EntityId,
        summary: &str,
    ) -> Result<String, ProviderError>;

    /// Closes a previously opened security advisory. A `NotFound` result
    /// is treated by the caller as success (externally closed).
    async fn close_security_advisory(
        &self,
        entity_id: &EntityId,
        advisory_id: &str,
    ) -> Result<(), ProviderError>;
}
