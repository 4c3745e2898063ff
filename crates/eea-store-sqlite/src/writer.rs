//! The single-writer-thread architecture: every mutating and reading
//! operation is serialized through one `rusqlite::Connection` owned by a
//! dedicated thread, since SQLite has no true serializable isolation
//! across connections short of a single writer. Lock acquisition and
//! flush-queue enqueueing execute inside one `BEGIN IMMEDIATE … COMMIT`
//! transaction so a lost-lock race cannot leave both records absent
//! (invariants I1/I2).

use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::SyncSender;
use std::sync::mpsc::sync_channel;

use eea_core::Entity;
use eea_core::EntityType;
use eea_core::EvaluationLock;
use eea_core::FlushQueueEntry;
use eea_core::ProfileId;
use eea_core::ProjectId;
use eea_core::ProviderId;
use eea_core::RuleEvaluationRecord;
use eea_core::RuleTypeId;
use eea_core::Verdict;
use eea_core::entity::PropertyMap;
use eea_core::identifiers::CorrelationId;
use eea_core::identifiers::EntityId;
use eea_core::interfaces::LockOutcome;
use eea_core::interfaces::StoreError;
use rand::RngCore as _;
use rand::rngs::OsRng;
use rusqlite::Connection;
use rusqlite::OptionalExtension as _;
use rusqlite::params;

use crate::schema;

/// One unit of work sent to the writer thread.
pub enum Command {
    /// See [`eea_core::interfaces::LockStore::lock_if_threshold_not_exceeded`].
    LockIfThresholdNotExceeded {
        /// The entity to acquire an evaluation lock for.
        entity_id: EntityId,
        /// The cool-down interval, in seconds, the lock is valid for.
        interval_seconds: u32,
        /// Channel the outcome is delivered on.
        reply: tokio::sync::oneshot::Sender<Result<LockOutcome, StoreError>>,
    },
    /// See [`eea_core::interfaces::LockStore::get_lock`].
    GetLock {
        /// The entity whose lock row is being read.
        entity_id: EntityId,
        /// Channel the outcome is delivered on.
        reply: tokio::sync::oneshot::Sender<Result<Option<EvaluationLock>, StoreError>>,
    },
    /// See [`eea_core::interfaces::FlushQueueStore::enqueue_flush`].
    EnqueueFlush {
        /// The entity to enqueue a deferred evaluation for.
        entity_id: EntityId,
        /// The administrative project that owns the entity.
        project_id: ProjectId,
        /// Channel the outcome is delivered on.
        reply: tokio::sync::oneshot::Sender<Result<(), StoreError>>,
    },
    /// See [`eea_core::interfaces::FlushQueueStore::list_flush_cache`].
    ListFlushCache {
        /// Channel the outcome is delivered on.
        reply: tokio::sync::oneshot::Sender<Result<Vec<FlushQueueEntry>, StoreError>>,
    },
    /// See [`eea_core::interfaces::FlushQueueStore::flush_cache`].
    FlushCache {
        /// The entity whose flush queue entry is being claimed.
        entity_id: EntityId,
        /// Channel the outcome is delivered on.
        reply: tokio::sync::oneshot::Sender<Result<bool, StoreError>>,
    },
    /// See [`eea_core::interfaces::EntityStore::get_entity_by_id`].
    GetEntityById {
        /// The entity to fetch.
        entity_id: EntityId,
        /// Channel the outcome is delivered on.
        reply: tokio::sync::oneshot::Sender<Result<Option<Entity>, StoreError>>,
    },
    /// See [`eea_core::interfaces::EntityStore::register_entity`].
    RegisterEntity {
        /// The kind of entity being registered.
        entity_type: EntityType,
        /// The administrative project that owns the entity.
        project_id: ProjectId,
        /// The entity's initial property map.
        properties: PropertyMap,
        /// Channel the outcome is delivered on.
        reply: tokio::sync::oneshot::Sender<Result<Entity, StoreError>>,
    },
    /// See [`eea_core::interfaces::EntityStore::deregister_entity`].
    DeregisterEntity {
        /// The entity to deregister.
        entity_id: EntityId,
        /// Channel the outcome is delivered on.
        reply: tokio::sync::oneshot::Sender<Result<(), StoreError>>,
    },
    /// See [`eea_core::interfaces::EvaluationHistory::record`].
    RecordEvaluation {
        /// The record to persist.
        record: RuleEvaluationRecord,
        /// Channel the outcome is delivered on.
        reply: tokio::sync::oneshot::Sender<Result<(), StoreError>>,
    },
    /// See [`eea_core::interfaces::EvaluationHistory::get_latest`].
    GetLatestEvaluation {
        /// The profile the evaluation ran under.
        profile_id: ProfileId,
        /// The rule type that was evaluated.
        rule_type_id: RuleTypeId,
        /// The entity the rule was evaluated against.
        entity_id: EntityId,
        /// Channel the outcome is delivered on.
        reply: tokio::sync::oneshot::Sender<Result<Option<RuleEvaluationRecord>, StoreError>>,
    },
}

/// A handle to the writer thread's command queue.
#[derive(Clone)]
pub struct WriteGateway {
    /// Channel the writer thread receives commands from.
    sender: SyncSender<Command>,
}

impl WriteGateway {
    /// Sends a command to the writer thread. Fails only if the writer
    /// thread has terminated.
    pub fn send(&self, command: Command) -> Result<(), StoreError> {
        self.sender
            .send(command)
            .map_err(|_err| StoreError::Unavailable("writer thread has stopped".to_owned()))
    }
}

/// Spawns the writer thread against a SQLite database at `path`, applying
/// pragmas and initializing the schema before accepting commands.
///
/// # Errors
/// Returns [`StoreError::Unavailable`] if the database cannot be opened.
pub fn spawn_writer_thread(path: PathBuf) -> Result<WriteGateway, StoreError> {
    let (sender, receiver) = sync_channel::<Command>(256);
    let conn =
        Connection::open(&path).map_err(|source| StoreError::Unavailable(source.to_string()))?;
    schema::apply_pragmas(&conn).map_err(|source| StoreError::Unavailable(source.to_string()))?;
    schema::initialize_schema(&conn)
        .map_err(|source| StoreError::Unavailable(source.to_string()))?;

    std::thread::Builder::new()
        .name("eea-sqlite-writer".to_owned())
        .spawn(move || writer_loop(conn, receiver))
        .map_err(|source| StoreError::Unavailable(source.to_string()))?;

    Ok(WriteGateway { sender })
}

/// Runs on the dedicated writer thread, dispatching commands one at a time until the channel closes.
fn writer_loop(conn: Connection, receiver: Receiver<Command>) {
    while let Ok(command) = receiver.recv() {
        dispatch(&conn, command);
    }
    tracing::debug!("eea-sqlite-writer thread exiting: command channel closed");
}

/// Routes one command to its handler function and sends the result to its reply channel.
fn dispatch(conn: &Connection, command: Command) {
    match command {
        Command::LockIfThresholdNotExceeded { entity_id, interval_seconds, reply } => {
            let _ =
                reply.send(lock_if_threshold_not_exceeded(conn, &entity_id, interval_seconds));
        }
        Command::GetLock { entity_id, reply } => {
            let _ = reply.send(get_lock(conn, &entity_id));
        }
        Command::EnqueueFlush { entity_id, project_id, reply } => {
            let _ = reply.send(enqueue_flush(conn, &entity_id, project_id));
        }
        Command::ListFlushCache { reply } => {
            let _ = reply.send(list_flush_cache(conn));
        }
        Command::FlushCache { entity_id, reply } => {
            let _ = reply.send(flush_cache(conn, &entity_id));
        }
        Command::GetEntityById { entity_id, reply } => {
            let _ = reply.send(get_entity_by_id(conn, &entity_id));
        }
        Command::RegisterEntity { entity_type, project_id, properties, reply } => {
            let _ = reply.send(register_entity(conn, entity_type, project_id, properties));
        }
        Command::DeregisterEntity { entity_id, reply } => {
            let _ = reply.send(deregister_entity(conn, &entity_id));
        }
        Command::RecordEvaluation { record, reply } => {
            let _ = reply.send(record_evaluation(conn, &record));
        }
        Command::GetLatestEvaluation { profile_id, rule_type_id, entity_id, reply } => {
            let _ =
                reply.send(get_latest_evaluation(conn, profile_id, rule_type_id, &entity_id));
        }
    }
}

/// Wraps any `rusqlite` error as a [`StoreError::Unavailable`].
fn map_sqlite_err(source: rusqlite::Error) -> StoreError {
    StoreError::Unavailable(source.to_string())
}

/// Draws 16 bytes from the OS CSPRNG for use as an identifier suffix.
fn random_token() -> [u8; 16] {
    let mut bytes = [0_u8; 16];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Renders `bytes` as lowercase hex.
fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Builds a fresh correlation id from a random token.
fn generate_correlation_id() -> CorrelationId {
    CorrelationId::new(hex_encode(&random_token()))
}

/// Builds a fresh, non-empty entity id. Infallible in practice: the
/// `entity-` prefix guarantees [`EntityId::new`] never sees an empty
/// string, but the `Option` is still propagated rather than unwrapped.
fn generate_entity_id() -> Result<EntityId, StoreError> {
    EntityId::new(format!("entity-{}", hex_encode(&random_token())))
        .ok_or_else(|| StoreError::Decode("generated entity id was empty".to_owned()))
}

/// Current time in milliseconds since the Unix epoch, saturating rather than panicking on overflow.
fn now_millis() -> i64 {
    i64::try_from(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|duration| duration.as_millis())
            .unwrap_or(0),
    )
    .unwrap_or(i64::MAX)
}

/// Acquires an evaluation lock for `entity_id` if no unexpired lock exists, inside one
/// `BEGIN IMMEDIATE … COMMIT` transaction (invariant I1).
fn lock_if_threshold_not_exceeded(
    conn: &Connection,
    entity_id: &EntityId,
    interval_seconds: u32,
) -> Result<LockOutcome, StoreError> {
    conn.execute_batch("BEGIN IMMEDIATE").map_err(map_sqlite_err)?;
    let result = (|| {
        let existing: Option<(String, i64, u32)> = conn
            .query_row(
                "SELECT locked_by, locked_at, interval_seconds FROM entity_lock WHERE entity_id = ?1",
                params![entity_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(map_sqlite_err)?;

        let now = now_millis();
        let expired = existing.as_ref().is_none_or(|(_, locked_at, interval)| {
            locked_at.saturating_add(i64::from(*interval).saturating_mul(1000)) < now
        });

        if !expired {
            return Ok(LockOutcome::NotApplicable);
        }

        let correlation_id = generate_correlation_id();
        conn.execute(
            "INSERT INTO entity_lock (entity_id, locked_by, locked_at, interval_seconds)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(entity_id) DO UPDATE SET locked_by = excluded.locked_by,
                 locked_at = excluded.locked_at, interval_seconds = excluded.interval_seconds",
            params![entity_id.as_str(), correlation_id.as_str(), now, interval_seconds],
        )
        .map_err(map_sqlite_err)?;

        Ok(LockOutcome::Acquired(correlation_id))
    })();

    match &result {
        Ok(_) => conn.execute_batch("COMMIT").map_err(map_sqlite_err)?,
        Err(_) => conn.execute_batch("ROLLBACK").map_err(map_sqlite_err)?,
    }
    result
}

/// Reads the current lock row for `entity_id`, if any.
fn get_lock(
    conn: &Connection,
    entity_id: &EntityId,
) -> Result<Option<EvaluationLock>, StoreError> {
    conn.query_row(
        "SELECT locked_by, locked_at, interval_seconds FROM entity_lock WHERE entity_id = ?1",
        params![entity_id.as_str()],
        |row| {
            let locked_by: String = row.get(0)?;
            Ok(EvaluationLock {
                entity_id: entity_id.clone(),
                locked_by: CorrelationId::new(locked_by),
                locked_at: row.get(1)?,
                interval_seconds: row.get(2)?,
            })
        },
    )
    .optional()
    .map_err(map_sqlite_err)
}

/// Inserts a flush-queue row for `entity_id`, a no-op if one already exists (invariant I2).
fn enqueue_flush(
    conn: &Connection,
    entity_id: &EntityId,
    project_id: ProjectId,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO flush_queue (entity_id, project_id, enqueued_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(entity_id) DO NOTHING",
        params![
            entity_id.as_str(),
            i64::try_from(project_id.get()).unwrap_or(i64::MAX),
            now_millis()
        ],
    )
    .map_err(map_sqlite_err)?;
    Ok(())
}

/// Lists every entity currently waiting in the flush queue.
fn list_flush_cache(conn: &Connection) -> Result<Vec<FlushQueueEntry>, StoreError> {
    let mut statement = conn
        .prepare("SELECT entity_id, project_id, enqueued_at FROM flush_queue")
        .map_err(map_sqlite_err)?;
    let rows = statement
        .query_map([], |row| {
            let entity_id: String = row.get(0)?;
            let project_id: i64 = row.get(1)?;
            let enqueued_at: i64 = row.get(2)?;
            Ok((entity_id, project_id, enqueued_at))
        })
        .map_err(map_sqlite_err)?;

    let mut entries = Vec::new();
    for row in rows {
        let (entity_id, project_id, enqueued_at) = row.map_err(map_sqlite_err)?;
        let entity_id = EntityId::new(entity_id)
            .ok_or_else(|| StoreError::Decode("stored entity id was empty".to_owned()))?;
        let project_id = ProjectId::new(u64::try_from(project_id).unwrap_or(0))
            .ok_or_else(|| StoreError::Decode("stored project id was zero".to_owned()))?;
        entries.push(FlushQueueEntry { entity_id, project_id, enqueued_at });
    }
    Ok(entries)
}

/// Removes `entity_id`'s flush-queue row, returning whether one was present to claim.
fn flush_cache(conn: &Connection, entity_id: &EntityId) -> Result<bool, StoreError> {
    let affected = conn
        .execute("DELETE FROM flush_queue WHERE entity_id = ?1", params![entity_id.as_str()])
        .map_err(map_sqlite_err)?;
    Ok(affected > 0)
}

/// Reads and decodes the entity row for `entity_id`, if any.
fn get_entity_by_id(
    conn: &Connection,
    entity_id: &EntityId,
) -> Result<Option<Entity>, StoreError> {
    let row = conn
        .query_row(
            "SELECT entity_type, project_id, provider_id, properties_json FROM entity WHERE entity_id = ?1",
            params![entity_id.as_str()],
            |row| {
                let entity_type: String = row.get(0)?;
                let project_id: i64 = row.get(1)?;
                let provider_id: String = row.get(2)?;
                let properties_json: String = row.get(3)?;
                Ok((entity_type, project_id, provider_id, properties_json))
            },
        )
        .optional()
        .map_err(map_sqlite_err)?;

    row.map(|(entity_type, project_id, provider_id, properties_json)| {
        decode_entity(entity_id, &entity_type, project_id, &provider_id, &properties_json)
    })
    .transpose()
}

/// Parses raw column values from the `entity` table into an [`Entity`].
fn decode_entity(
    entity_id: &EntityId,
    entity_type: &str,
    project_id: i64,
    provider_id: &str,
    properties_json: &str,
) -> Result<Entity, StoreError> {
    let entity_type = EntityType::from_tag(entity_type)
        .ok_or_else(|| StoreError::Decode(format!("unknown entity type {entity_type}")))?;
    let project_id = ProjectId::new(u64::try_from(project_id).unwrap_or(0))
        .ok_or_else(|| StoreError::Decode("stored project id was zero".to_owned()))?;
    let provider_id = ProviderId::new(provider_id.to_owned())
        .ok_or_else(|| StoreError::Decode("stored provider id was empty".to_owned()))?;
    let properties: PropertyMap = serde_json::from_str(properties_json)
        .map_err(|source| StoreError::Decode(source.to_string()))?;
    Ok(Entity { id: entity_id.clone(), entity_type, project_id, provider_id, properties })
}

/// The store does not learn an entity's upstream provider until a
/// provider-specific ingest client calls back in; registration alone
/// records a sentinel that callers update via a later property refresh.
fn default_provider_id() -> Result<ProviderId, StoreError> {
    ProviderId::new("unspecified")
        .ok_or_else(|| StoreError::Decode("default provider id was empty".to_owned()))
}

/// Inserts a new entity row with a freshly generated id and a sentinel provider id.
fn register_entity(
    conn: &Connection,
    entity_type: EntityType,
    project_id: ProjectId,
    properties: PropertyMap,
) -> Result<Entity, StoreError> {
    let entity_id = generate_entity_id()?;
    let provider_id = default_provider_id()?;
    let properties_json = serde_json::to_string(&properties)
        .map_err(|source| StoreError::Decode(source.to_string()))?;
    conn.execute(
        "INSERT INTO entity (entity_id, entity_type, project_id, provider_id, properties_json)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            entity_id.as_str(),
            entity_type.tag(),
            i64::try_from(project_id.get()).unwrap_or(i64::MAX),
            provider_id.as_str(),
            properties_json,
        ],
    )
    .map_err(map_sqlite_err)?;
    Ok(Entity { id: entity_id, entity_type, project_id, provider_id, properties })
}

/// Deletes the entity row for `entity_id`; cascading foreign keys remove its lock, flush-queue,
/// and evaluation history rows (invariant I4).
fn deregister_entity(conn: &Connection, entity_id: &EntityId) -> Result<(), StoreError> {
    conn.execute("DELETE FROM entity WHERE entity_id = ?1", params![entity_id.as_str()])
        .map_err(map_sqlite_err)?;
    Ok(())
}

/// Maps a [`Verdict`] to its stored string tag.
fn verdict_tag(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::Passed => "passed",
        Verdict::Failed => "failed",
        Verdict::Skipped => "skipped",
        Verdict::Error => "error",
    }
}

/// Maps a stored string tag back to a [`Verdict`].
fn verdict_from_tag(tag: &str) -> Result<Verdict, StoreError> {
    match tag {
        "passed" => Ok(Verdict::Passed),
        "failed" => Ok(Verdict::Failed),
        "skipped" => Ok(Verdict::Skipped),
        "error" => Ok(Verdict::Error),
        other => Err(StoreError::Decode(format!("unknown verdict {other}"))),
    }
}

/// Upserts the evaluation record for its `(profile_id, rule_type_id, entity_id)` key.
fn record_evaluation(conn: &Connection, record: &RuleEvaluationRecord) -> Result<(), StoreError> {
    let detail_json = serde_json::to_string(&record.detail)
        .map_err(|source| StoreError::Decode(source.to_string()))?;
    let alert_metadata_json = record
        .alert_metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|source| StoreError::Decode(source.to_string()))?;
    let remediation_metadata_json = record
        .remediation_metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|source| StoreError::Decode(source.to_string()))?;

    conn.execute(
        "INSERT INTO rule_evaluation
            (profile_id, rule_type_id, entity_id, verdict, detail_json, evaluated_at,
             alert_metadata_json, remediation_metadata_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(profile_id, rule_type_id, entity_id) DO UPDATE SET
            verdict = excluded.verdict,
            detail_json = excluded.detail_json,
            evaluated_at = excluded.evaluated_at,
            alert_metadata_json = excluded.alert_metadata_json,
            remediation_metadata_json = excluded.remediation_metadata_json",
        params![
            i64::try_from(record.profile_id.get()).unwrap_or(i64::MAX),
            i64::try_from(record.rule_type_id.get()).unwrap_or(i64::MAX),
            record.entity_id.as_str(),
            verdict_tag(record.verdict),
            detail_json,
            record.evaluated_at,
            alert_metadata_json,
            remediation_metadata_json,
        ],
    )
    .map_err(map_sqlite_err)?;
    Ok(())
}

/// Raw columns read back from the `rule_evaluation` table before decoding.
struct EvaluationRow {
    /// Stored verdict tag.
    verdict: String,
    /// Serialized [`eea_core::EvaluationDetail`].
    detail_json: String,
    /// Unix millisecond timestamp the evaluation ran at.
    evaluated_at: i64,
    /// Serialized alert metadata, if the verdict produced an alert.
    alert_metadata_json: Option<String>,
    /// Serialized remediation metadata, if the verdict triggered remediation.
    remediation_metadata_json: Option<String>,
}

/// Reads the most recent evaluation record for a `(profile, rule type, entity)` key.
fn get_latest_evaluation(
    conn: &Connection,
    profile_id: ProfileId,
    rule_type_id: RuleTypeId,
    entity_id: &EntityId,
) -> Result<Option<RuleEvaluationRecord>, StoreError> {
    let row = conn
        .query_row(
            "SELECT verdict, detail_json, evaluated_at, alert_metadata_json, remediation_metadata_json
             FROM rule_evaluation WHERE profile_id = ?1 AND rule_type_id = ?2 AND entity_id = ?3",
            params![
                i64::try_from(profile_id.get()).unwrap_or(i64::MAX),
                i64::try_from(rule_type_id.get()).unwrap_or(i64::MAX),
                entity_id.as_str(),
            ],
            |row| {
                Ok(EvaluationRow {
                    verdict: row.get(0)?,
                    detail_json: row.get(1)?,
                    evaluated_at: row.get(2)?,
                    alert_metadata_json: row.get(3)?,
                    remediation_metadata_json: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(map_sqlite_err)?;

    row.map(|row| decode_record(profile_id, rule_type_id, entity_id, row)).transpose()
}

/// Parses an [`EvaluationRow`] into a [`RuleEvaluationRecord`].
fn decode_record(
    profile_id: ProfileId,
    rule_type_id: RuleTypeId,
    entity_id: &EntityId,
    row: EvaluationRow,
) -> Result<RuleEvaluationRecord, StoreError> {
    let verdict = verdict_from_tag(&row.verdict)?;
    let detail = serde_json::from_str(&row.detail_json)
        .map_err(|source| StoreError::Decode(source.to_string()))?;
    let alert_metadata = row
        .alert_metadata_json
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|source| StoreError::Decode(source.to_string()))?;
    let remediation_metadata = row
        .remediation_metadata_json
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|source| StoreError::Decode(source.to_string()))?;
    Ok(RuleEvaluationRecord {
        profile_id,
        rule_type_id,
        entity_id: entity_id.clone(),
        verdict,
        detail,
        evaluated_at: row.evaluated_at,
        alert_metadata,
        remediation_metadata,
    })
}
