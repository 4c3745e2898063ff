//! The public-facing SQLite store: thin trait implementations that hand
//! every operation to the writer thread and await its reply.

use std::path::Path;
use std::path::PathBuf;

use async_trait::async_trait;
use eea_core::Entity;
use eea_core::EntityType;
use eea_core::EvaluationLock;
use eea_core::FlushQueueEntry;
use eea_core::ProfileId;
use eea_core::ProjectId;
use eea_core::RuleEvaluationRecord;
use eea_core::RuleTypeId;
use eea_core::entity::PropertyMap;
use eea_core::identifiers::EntityId;
use eea_core::interfaces::EntityStore;
use eea_core::interfaces::EvaluationHistory;
use eea_core::interfaces::FlushQueueStore;
use eea_core::interfaces::LockOutcome;
use eea_core::interfaces::LockStore;
use eea_core::interfaces::StoreError;

use crate::writer::Command;
use crate::writer::WriteGateway;
use crate::writer::spawn_writer_thread;

/// Configuration for [`SqliteStore::open`].
#[derive(Debug, Clone)]
pub struct SqliteStoreConfig {
    /// Filesystem path to the SQLite database file. `:memory:` is rejected
    /// since the single-writer-thread architecture requires a durable file
    /// shared across process restarts.
    pub database_path: PathBuf,
}

impl SqliteStoreConfig {
    /// Builds a configuration pointing at `database_path`.
    #[must_use]
    pub fn new(database_path: impl AsRef<Path>) -> Self {
        Self { database_path: database_path.as_ref().to_path_buf() }
    }
}

/// A persistent store backed by a single writer thread owning one SQLite
/// connection, implementing every `eea_core::interfaces` storage trait.
#[derive(Clone)]
pub struct SqliteStore {
    /// Handle used to submit commands to the writer thread.
    gateway: WriteGateway,
}

impl SqliteStore {
    /// Opens (creating if absent) the database at `config.database_path`
    /// and spawns its writer thread.
    ///
    /// # Errors
    /// Returns [`StoreError::Unavailable`] if the database cannot be
    /// opened or the writer thread cannot be spawned.
    pub fn open(config: &SqliteStoreConfig) -> Result<Self, StoreError> {
        let gateway = spawn_writer_thread(config.database_path.clone())?;
        Ok(Self { gateway })
    }

    /// Sends a command built from a fresh reply channel and awaits its response.
    async fn round_trip<T>(
        &self,
        build: impl FnOnce(tokio::sync::oneshot::Sender<Result<T, StoreError>>) -> Command,
    ) -> Result<T, StoreError> {
        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        self.gateway.send(build(reply_tx))?;
        reply_rx
            .await
            .map_err(|_err| StoreError::Unavailable("writer thread dropped reply channel".to_owned()))?
    }
}

#[async_trait]
impl EntityStore for SqliteStore {
    async fn get_entity_by_id(&self, entity_id: &EntityId) -> Result<Option<Entity>, StoreError> {
        let entity_id = entity_id.clone();
        self.round_trip(|reply| Command::GetEntityById { entity_id, reply }).await
    }

    async fn register_entity(
        &self,
        entity_type: EntityType,
        project_id: ProjectId,
        properties: PropertyMap,
    ) -> Result<Entity, StoreError> {
        self.round_trip(|reply| Command::RegisterEntity {
            entity_type,
            project_id,
            properties,
            reply,
        })
        .await
    }

    async fn deregister_entity(&self, entity_id: &EntityId) -> Result<(), StoreError> {
        let entity_id = entity_id.clone();
        self.round_trip(|reply| Command::DeregisterEntity { entity_id, reply }).await
    }
}

#[async_trait]
impl LockStore for SqliteStore {
    async fn lock_if_threshold_not_exceeded(
        &self,
        entity_id: &EntityId,
        interval_seconds: u32,
    ) -> Result<LockOutcome, StoreError> {
        let entity_id = entity_id.clone();
        self.round_trip(|reply| Command::LockIfThresholdNotExceeded {
            entity_id,
            interval_seconds,
            reply,
        })
        .await
    }

    async fn get_lock(&self, entity_id: &EntityId) -> Result<Option<EvaluationLock>, StoreError> {
        let entity_id = entity_id.clone();
        self.round_trip(|reply| Command::GetLock { entity_id, reply }).await
    }
}

#[async_trait]
impl FlushQueueStore for SqliteStore {
    async fn enqueue_flush(
        &self,
        entity_id: &EntityId,
        project_id: ProjectId,
    ) -> Result<(), StoreError> {
        let entity_id = entity_id.clone();
        self.round_trip(|reply| Command::EnqueueFlush { entity_id, project_id, reply }).await
    }

    async fn list_flush_cache(&self) -> Result<Vec<FlushQueueEntry>, StoreError> {
        self.round_trip(|reply| Command::ListFlushCache { reply }).await
    }

    async fn flush_cache(&self, entity_id: &EntityId) -> Result<bool, StoreError> {
        let entity_id = entity_id.clone();
        self.round_trip(|reply| Command::FlushCache { entity_id, reply }).await
    }
}

#[async_trait]
impl EvaluationHistory for SqliteStore {
    async fn record(&self, record: RuleEvaluationRecord) -> Result<(), StoreError> {
        self.round_trip(|reply| Command::RecordEvaluation { record, reply }).await
    }

    async fn get_latest(
        &self,
        profile_id: ProfileId,
        rule_type_id: RuleTypeId,
        entity_id: &EntityId,
    ) -> Result<Option<RuleEvaluationRecord>, StoreError> {
        let entity_id = entity_id.clone();
        self.round_trip(|reply| Command::GetLatestEvaluation {
            profile_id,
            rule_type_id,
            entity_id,
            reply,
        })
        .await
    }
}
