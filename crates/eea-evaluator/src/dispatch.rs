//! The evaluator's downstream seam: handing a verdict to whatever action
//! dispatcher is wired in (`eea-actions`'s `ActionDispatcher`, or a stub in
//! tests), without the evaluator depending on the dispatcher crate. Mirrors
//! how `eea_core::interfaces` defines the store/bus traits its own
//! consumers implement rather than depending on them.

use async_trait::async_trait;
use eea_core::Profile;
use eea_core::RuleEvaluationRecord;
use eea_core::RuleType;
use eea_core::entity::Entity;

/// The metadata produced by dispatching one rule's verdict, written back
/// into that rule's evaluation record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchOutcome {
    /// Updated alert metadata, or `None` to clear it.
    pub alert_metadata: Option<serde_json::Value>,
    /// Updated remediation metadata, or `None` to clear it.
    pub remediation_metadata: Option<serde_json::Value>,
}

/// Consumes one rule's verdict, issuing whatever external action the
/// profile's switches and the rule type's action configuration call for.
///
/// Async because dispatching may call a provider over the network
/// (spec.md §5: "C6 blocks on provider API calls").
#[async_trait]
pub trait ActionDispatch: Send + Sync {
    /// Dispatches the action for one rule's outcome against one entity.
    ///
    /// # Errors
    /// Returns a human-readable failure description; the evaluator maps
    /// this to [`crate::EvaluatorError::Action`] and records no metadata,
    /// so the next run retries against the unchanged prior state.
    async fn dispatch(
        &self,
        profile: &Profile,
        rule_type: &RuleType,
        entity: &Entity,
        prior: Option<&RuleEvaluationRecord>,
        outcome: &eea_policy_lang::PredicateOutcome,
    ) -> Result<DispatchOutcome, String>;

    /// Flushes any actions batched across the rules just evaluated for
    /// `entity_id` (spec.md §4.7's Shared Action Context), e.g. the
    /// per-rule PR-comment fragments coalesced into one review. Called
    /// once per envelope, after every rule type has been dispatched.
    ///
    /// The default implementation does nothing, for dispatchers that
    /// never register batched actions.
    ///
    /// # Errors
    /// Returns a human-readable description joining every flusher
    /// failure; a failing flush never aborts the evaluations it
    /// describes, since their records are already written.
    async fn flush_evaluation(&self, entity_id: &eea_core::EntityId) -> Result<(), String> {
        let _ = entity_id;
        Ok(())
    }
}

/// A dispatcher that performs no external calls and writes no metadata,
/// used when no action dispatcher is wired in (evaluation-only
/// deployments) and by tests that only assert on verdicts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDispatch;

#[async_trait]
impl ActionDispatch for NoopDispatch {
    async fn dispatch(
        &self,
        _profile: &Profile,
        _rule_type: &RuleType,
        _entity: &Entity,
        _prior: Option<&RuleEvaluationRecord>,
        _outcome: &eea_policy_lang::PredicateOutcome,
    ) -> Result<DispatchOutcome, String> {
        Ok(DispatchOutcome::default())
    }
}
