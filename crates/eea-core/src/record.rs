//! Persisted coordination and history records: flush queue entries,
//! evaluation locks, and rule evaluation records.

use serde::Deserialize;
use serde::Serialize;

use crate::identifiers::CorrelationId;
use crate::identifiers::EntityId;
use crate::identifiers::ProfileId;
use crate::identifiers::ProjectId;
use crate::identifiers::RuleTypeId;

/// A deferred evaluation request. At most one row exists per `entity_id`
/// (invariant I2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlushQueueEntry {
    /// The entity awaiting a deferred evaluation.
    pub entity_id: EntityId,
    /// The administrative project that owns the entity.
    pub project_id: ProjectId,
    /// Unix-epoch milliseconds at which the entry was enqueued.
    pub enqueued_at: i64,
}

/// The row that serializes evaluations for one entity. At most one row
/// exists per `entity_id` at any wall-clock instant (invariant I1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationLock {
    /// The locked entity.
    pub entity_id: EntityId,
    /// The correlation id generated when this lock was acquired.
    pub locked_by: CorrelationId,
    /// Unix-epoch milliseconds at which the lock was acquired.
    pub locked_at: i64,
    /// The cool-down interval, in seconds, before a new lock may be
    /// acquired for this entity.
    pub interval_seconds: u32,
}

impl EvaluationLock {
    /// Returns whether this lock has expired as of `now_millis`, i.e.
    /// whether `locked_at + interval < now`.
    #[must_use]
    pub fn expired_at(&self, now_millis: i64) -> bool {
        let interval_millis = i64::from(self.interval_seconds).saturating_mul(1000);
        self.locked_at.saturating_add(interval_millis) < now_millis
    }
}

/// The outcome of running one rule type against one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// The predicate's condition held; no action is required.
    Passed,
    /// The predicate's condition did not hold; the configured action may
    /// fire.
    Failed,
    /// The predicate requested to be skipped; no action is dispatched.
    Skipped,
    /// The predicate failed to compile, timed out, or otherwise could not
    /// produce a verdict.
    Error,
}

/// Structured detail attached to a rule evaluation record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationDetail {
    /// Human-readable detail text, bounded to 1024 characters.
    #[serde(default)]
    pub message: String,
    /// Arbitrary structured output attached by the predicate, if any.
    #[serde(default)]
    pub output: Option<serde_json::Value>,
}

/// An append-only record of one rule's outcome against one entity,
/// keyed by `(profile_id, rule_type_id, entity_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEvaluationRecord {
    /// The profile this evaluation ran under.
    pub profile_id: ProfileId,
    /// The rule type that was evaluated.
    pub rule_type_id: RuleTypeId,
    /// The entity the rule was evaluated against.
    pub entity_id: EntityId,
    /// The evaluation's outcome.
    pub verdict: Verdict,
    /// Structured detail describing the outcome.
    pub detail: EvaluationDetail,
    /// Unix-epoch milliseconds at which the evaluation completed.
    pub evaluated_at: i64,
    /// Opaque metadata written by the action dispatcher for the advisory
    /// action kind; non-null iff an alert opened by the most recent
    /// dispatch has not yet been closed (invariant I3).
    pub alert_metadata: Option<serde_json::Value>,
    /// Opaque metadata written by the action dispatcher for the
    /// remediation action kind.
    pub remediation_metadata: Option<serde_json::Value>,
}
