//! The Action Dispatcher (C6): for each rule verdict, chooses a command
//! from `{on, off, do_nothing}` per the profile's action-switch settings
//! and the rule type's configured action kinds, then issues whatever
//! external call that command calls for.
//!
//! Implements [`eea_evaluator::ActionDispatch`], the seam
//! `eea-evaluator` defines for its C4-to-C6 handoff so that crate never
//! depends on this one. State reconciliation reads the prior record's
//! `*_metadata` fields verbatim as the cursor (spec.md §4.6); this crate
//! never reads from [`eea_core::interfaces::EvaluationHistory`] directly,
//! since the evaluator already looked up and threads through the prior
//! record.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use eea_core::FlusherKey;
use eea_core::Profile;
use eea_core::RuleEvaluationRecord;
use eea_core::RuleType;
use eea_core::Verdict;
use eea_core::entity::Entity;
use eea_core::identifiers::EntityId;
use eea_core::interfaces::ProviderClient;
use eea_core::profile::ActionKind;
use eea_core::profile::ActionSwitch;
use eea_evaluator::ActionDispatch;
use eea_evaluator::DispatchOutcome;
use eea_policy_lang::PredicateOutcome;

use crate::context::AggregatingFlusher;
use crate::context::PULL_REQUEST_COMMENT_KEY;
use crate::context::SharedActionContext;
use crate::handlers::AdvisoryHandler;
use crate::handlers::CommentFragment;
use crate::handlers::PrCommentFlusher;
use crate::handlers::Remediator;

/// The command the dispatcher chooses for one action kind, derived from a
/// verdict and whether that kind's prior metadata is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Issue the kind's "open" side effect.
    On,
    /// Issue the kind's "close" side effect (or, for kinds with no close
    /// operation, simply clear the stored metadata).
    Off,
    /// Issue no external call; carry over prior metadata unchanged.
    DoNothing,
}

/// Chooses a command per spec.md §4.6: a `skipped` verdict always does
/// nothing; otherwise a `failed` verdict with no metadata yet opens, a
/// `passed` verdict with metadata present closes, and every other
/// combination (including a `failed` verdict whose metadata is already
/// present, which would otherwise re-issue an already-open action) does
/// nothing.
fn decide_command(verdict: Verdict, metadata_present: bool) -> Command {
    match verdict {
        Verdict::Skipped | Verdict::Error => Command::DoNothing,
        Verdict::Failed if metadata_present => Command::DoNothing,
        Verdict::Failed => Command::On,
        Verdict::Passed if metadata_present => Command::Off,
        Verdict::Passed => Command::DoNothing,
    }
}

/// Dispatches external actions for rule verdicts (C6), coalescing
/// per-rule PR-comment contributions through a per-entity
/// [`SharedActionContext`] (C7).
pub struct ActionDispatcher {
    /// Opens and closes provider-side advisories.
    advisory: AdvisoryHandler,
    /// Applies provider-defined remediations.
    remediator: Arc<dyn Remediator>,
    /// Flushes batched PR-comment fragments into one aggregate review.
    pr_comment_flusher: Arc<PrCommentFlusher>,
    /// Per-entity shared action contexts, live between the first rule
    /// dispatched for an evaluation and that evaluation's
    /// [`ActionDispatch::flush_evaluation`] call.
    contexts: Mutex<BTreeMap<EntityId, Arc<SharedActionContext>>>,
}

impl ActionDispatcher {
    /// Builds a dispatcher wrapping `provider` for advisory and
    /// PR-comment actions and `remediator` for remediation actions.
    #[must_use]
    pub fn new(provider: Arc<dyn ProviderClient>, remediator: Arc<dyn Remediator>) -> Self {
        Self {
            advisory: AdvisoryHandler::new(Arc::clone(&provider)),
            remediator,
            pr_comment_flusher: Arc::new(PrCommentFlusher::new(provider)),
            contexts: Mutex::new(BTreeMap::new()),
        }
    }

    /// Returns the shared action context for `entity_id`, creating one if
    /// this is the first rule dispatched for it this evaluation.
    fn context_for(&self, entity_id: &EntityId) -> Arc<SharedActionContext> {
        let mut contexts = match self.contexts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(contexts.entry(entity_id.clone()).or_insert_with(|| Arc::new(SharedActionContext::new())))
    }

    /// Removes and returns the shared action context for `entity_id`, if
    /// any rule registered against it this evaluation.
    fn take_context(&self, entity_id: &EntityId) -> Option<Arc<SharedActionContext>> {
        let mut contexts = match self.contexts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        contexts.remove(entity_id)
    }

    /// Dispatches the `advisory` action kind, returning the metadata to
    /// persist as the record's `alert_metadata`.
    async fn dispatch_advisory(
        &self,
        profile: &Profile,
        rule_type: &RuleType,
        entity: &Entity,
        prior_metadata: Option<serde_json::Value>,
        outcome: &PredicateOutcome,
    ) -> Result<Option<serde_json::Value>, String> {
        let switch = profile.switch(ActionKind::Advisory);
        if switch == ActionSwitch::Off {
            return Ok(prior_metadata);
        }

        match decide_command(outcome.verdict, prior_metadata.is_some()) {
            Command::DoNothing => Ok(prior_metadata),
            Command::On if switch == ActionSwitch::DryRun => {
                tracing::info!(entity_id = %entity.id, rule_type_id = %rule_type.id, "dry run: would open advisory");
                Ok(prior_metadata)
            }
            Command::Off if switch == ActionSwitch::DryRun => {
                tracing::info!(entity_id = %entity.id, rule_type_id = %rule_type.id, "dry run: would close advisory");
                Ok(prior_metadata)
            }
            Command::On => {
                let advisory_id = self.advisory.open(&entity.id, &outcome.detail.message).await?;
                Ok(Some(serde_json::Value::String(advisory_id)))
            }
            Command::Off => {
                if let Some(serde_json::Value::String(advisory_id)) = &prior_metadata {
                    self.advisory.close(&entity.id, advisory_id).await?;
                }
                Ok(None)
            }
        }
    }

    /// Dispatches the `remediation` action kind, returning the metadata to
    /// persist as the record's `remediation_metadata`. There is no
    /// provider-side "undo" for a remediation (spec.md §4.6), so the
    /// `Off` command only clears the stored metadata.
    async fn dispatch_remediation(
        &self,
        profile: &Profile,
        rule_type: &RuleType,
        entity: &Entity,
        prior_metadata: Option<serde_json::Value>,
        outcome: &PredicateOutcome,
    ) -> Result<Option<serde_json::Value>, String> {
        let switch = profile.switch(ActionKind::Remediation);
        if switch == ActionSwitch::Off {
            return Ok(prior_metadata);
        }

        match decide_command(outcome.verdict, prior_metadata.is_some()) {
            Command::DoNothing => Ok(prior_metadata),
            Command::Off => Ok(None),
            Command::On if switch == ActionSwitch::DryRun => {
                tracing::info!(
                    entity_id = %entity.id,
                    rule_type_id = %rule_type.id,
                    "dry run: would apply remediation"
                );
                Ok(prior_metadata)
            }
            Command::On => {
                let metadata = self.remediator.apply(&entity.id, rule_type).await?;
                Ok(Some(metadata))
            }
        }
    }

    /// Dispatches the `pr_comment` action kind: on a `failed` verdict with
    /// the switch on, registers one comment fragment with the per-entity
    /// shared action context rather than calling the provider directly,
    /// so every failing rule's fragment coalesces into one review at
    /// evaluation end (spec.md §4.7). This action kind persists no
    /// metadata of its own.
    fn dispatch_pr_comment(&self, profile: &Profile, rule_type: &RuleType, entity: &Entity, outcome: &PredicateOutcome) {
        let switch = profile.switch(ActionKind::PrComment);
        if switch == ActionSwitch::Off || outcome.verdict != Verdict::Failed {
            return;
        }
        if switch == ActionSwitch::DryRun {
            tracing::info!(
                entity_id = %entity.id,
                rule_type_id = %rule_type.id,
                "dry run: would register a pull request comment fragment"
            );
            return;
        }

        let fragment = CommentFragment { title: rule_type.display_name.clone(), body: outcome.detail.message.clone() };
        let Ok(item) = serde_json::to_value(fragment) else {
            tracing::warn!(entity_id = %entity.id, "failed to serialize comment fragment, dropping");
            return;
        };

        let Some(key) = FlusherKey::new(PULL_REQUEST_COMMENT_KEY) else {
            return;
        };
        let flusher: Arc<dyn AggregatingFlusher> = Arc::clone(&self.pr_comment_flusher) as Arc<dyn AggregatingFlusher>;
        self.context_for(&entity.id).share_and_register(key, flusher, item);
    }
}

#[async_trait]
impl ActionDispatch for ActionDispatcher {
    async fn dispatch(
        &self,
        profile: &Profile,
        rule_type: &RuleType,
        entity: &Entity,
        prior: Option<&RuleEvaluationRecord>,
        outcome: &PredicateOutcome,
    ) -> Result<DispatchOutcome, String> {
        let prior_alert = prior.and_then(|record| record.alert_metadata.clone());
        let prior_remediation = prior.and_then(|record| record.remediation_metadata.clone());

        let alert_metadata = if rule_type.actions.advisory.is_some() {
            self.dispatch_advisory(profile, rule_type, entity, prior_alert, outcome).await?
        } else {
            prior_alert
        };

        if rule_type.actions.pr_comment.is_some() {
            self.dispatch_pr_comment(profile, rule_type, entity, outcome);
        }

        let remediation_metadata = if rule_type.actions.remediation.is_some() {
            self.dispatch_remediation(profile, rule_type, entity, prior_remediation, outcome).await?
        } else {
            prior_remediation
        };

        Ok(DispatchOutcome { alert_metadata, remediation_metadata })
    }

    async fn flush_evaluation(&self, entity_id: &EntityId) -> Result<(), String> {
        match self.take_context(entity_id) {
            Some(context) => context.flush_all(entity_id).await,
            None => Ok(()),
        }
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
    use std::sync::Mutex as StdMutex;

    use eea_core::EntityType;
    use eea_core::EvaluationDetail;
    use eea_core::ProfileId;
    use eea_core::ProjectId;
    use eea_core::ProviderId;
    use eea_core::RuleTypeId;
    use eea_core::entity::PropertyMap;
    use eea_core::interfaces::ProviderError;
    use eea_core::rule_type::ActionConfig;
    use eea_core::rule_type::IngestSpec;
    use eea_core::rule_type::OutputFormat;
    use eea_core::rule_type::PredicateFlavour;
    use eea_core::rule_type::Severity;

    use super::*;
    use crate::handlers::LoggingRemediator;

    #[derive(Default)]
    struct RecordingProvider {
        advisories_opened: StdMutex<Vec<String>>,
        advisories_closed: StdMutex<Vec<String>>,
        reviews: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl ProviderClient for RecordingProvider {
        async fn register_entity(
            &self,
            _entity_type: EntityType,
            properties: PropertyMap,
        ) -> Result<PropertyMap, ProviderError> {
            Ok(properties)
        }
        async fn deregister_entity(
            &self,
            _entity_type: EntityType,
            _properties: &PropertyMap,
        ) -> Result<(), ProviderError> {
            Ok(())
        }
        async fn retrieve_all_properties(
            &self,
            _entity_type: EntityType,
            properties: &PropertyMap,
        ) -> Result<PropertyMap, ProviderError> {
            Ok(properties.clone())
        }
        async fn create_review(&self, _entity_id: &EntityId, body: &str) -> Result<String, ProviderError> {
            self.reviews.lock().expect("lock").push(body.to_owned());
            Ok("review-1".to_owned())
        }
        async fn dismiss_review(&self, _entity_id: &EntityId, _review_id: &str) -> Result<(), ProviderError> {
            Ok(())
        }
        async fn create_security_advisory(
            &self,
            _entity_id: &EntityId,
            summary: &str,
        ) -> Result<String, ProviderError> {
            self.advisories_opened.lock().expect("lock").push(summary.to_owned());
            Ok("advisory-1".to_owned())
        }
        async fn close_security_advisory(
            &self,
            _entity_id: &EntityId,
            advisory_id: &str,
        ) -> Result<(), ProviderError> {
            self.advisories_closed.lock().expect("lock").push(advisory_id.to_owned());
            Ok(())
        }
    }

    fn entity() -> Entity {
        Entity {
            id: EntityId::new("e1").expect("non-empty"),
            entity_type: EntityType::Repository,
            project_id: ProjectId::new(1).expect("non-zero"),
            provider_id: ProviderId::new("github").expect("non-empty"),
            properties: BTreeMap::new(),
        }
    }

    fn rule_type_with(actions: ActionConfig) -> RuleType {
        RuleType {
            id: RuleTypeId::new(1).expect("non-zero"),
            display_name: "no secrets committed".to_owned(),
            guidance: "remove the secret".to_owned(),
            ingest: IngestSpec::default(),
            predicate_flavour: PredicateFlavour::DenyByDefault,
            predicate: String::new(),
            actions,
            severity: Severity::High,
            output_format: OutputFormat::Text,
            extra: serde_json::Map::new(),
        }
    }

    fn profile_with(switches: BTreeMap<ActionKind, ActionSwitch>) -> Profile {
        Profile {
            id: ProfileId::new(1).expect("non-zero"),
            project_id: ProjectId::new(1).expect("non-zero"),
            entity_types: vec![EntityType::Repository],
            rule_types: Vec::new(),
            action_switches: switches,
        }
    }

    fn failed_outcome(message: &str) -> PredicateOutcome {
        PredicateOutcome { verdict: Verdict::Failed, detail: EvaluationDetail { message: message.to_owned(), output: None } }
    }

    fn passed_outcome() -> PredicateOutcome {
        PredicateOutcome { verdict: Verdict::Passed, detail: EvaluationDetail::default() }
    }

    #[tokio::test]
    async fn a_failed_verdict_with_switch_on_opens_an_advisory() {
        let provider = Arc::new(RecordingProvider::default());
        let dispatcher =
            ActionDispatcher::new(Arc::clone(&provider) as Arc<dyn ProviderClient>, Arc::new(LoggingRemediator));
        let profile = profile_with(BTreeMap::from([(ActionKind::Advisory, ActionSwitch::On)]));
        let rule_type = rule_type_with(ActionConfig { advisory: Some(serde_json::json!({})), ..Default::default() });

        let outcome = dispatcher
            .dispatch(&profile, &rule_type, &entity(), None, &failed_outcome("a secret was committed"))
            .await
            .expect("dispatches");

        assert_eq!(outcome.alert_metadata, Some(serde_json::Value::String("advisory-1".to_owned())));
        assert_eq!(provider.advisories_opened.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn a_second_failed_run_does_not_reopen_an_already_open_advisory() {
        let provider = Arc::new(RecordingProvider::default());
        let dispatcher =
            ActionDispatcher::new(Arc::clone(&provider) as Arc<dyn ProviderClient>, Arc::new(LoggingRemediator));
        let profile = profile_with(BTreeMap::from([(ActionKind::Advisory, ActionSwitch::On)]));
        let rule_type = rule_type_with(ActionConfig { advisory: Some(serde_json::json!({})), ..Default::default() });
        let prior = RuleEvaluationRecord {
            profile_id: profile.id,
            rule_type_id: rule_type.id,
            entity_id: entity().id,
            verdict: Verdict::Failed,
            detail: EvaluationDetail::default(),
            evaluated_at: 0,
            alert_metadata: Some(serde_json::Value::String("advisory-1".to_owned())),
            remediation_metadata: None,
        };

        let outcome = dispatcher
            .dispatch(&profile, &rule_type, &entity(), Some(&prior), &failed_outcome("still there"))
            .await
            .expect("dispatches");

        assert_eq!(outcome.alert_metadata, prior.alert_metadata);
        assert!(provider.advisories_opened.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn a_passed_verdict_with_prior_metadata_closes_the_advisory() {
        let provider = Arc::new(RecordingProvider::default());
        let dispatcher =
            ActionDispatcher::new(Arc::clone(&provider) as Arc<dyn ProviderClient>, Arc::new(LoggingRemediator));
        let profile = profile_with(BTreeMap::from([(ActionKind::Advisory, ActionSwitch::On)]));
        let rule_type = rule_type_with(ActionConfig { advisory: Some(serde_json::json!({})), ..Default::default() });
        let prior = RuleEvaluationRecord {
            profile_id: profile.id,
            rule_type_id: rule_type.id,
            entity_id: entity().id,
            verdict: Verdict::Failed,
            detail: EvaluationDetail::default(),
            evaluated_at: 0,
            alert_metadata: Some(serde_json::Value::String("advisory-1".to_owned())),
            remediation_metadata: None,
        };

        let outcome = dispatcher
            .dispatch(&profile, &rule_type, &entity(), Some(&prior), &passed_outcome())
            .await
            .expect("dispatches");

        assert_eq!(outcome.alert_metadata, None);
        assert_eq!(*provider.advisories_closed.lock().expect("lock"), vec!["advisory-1".to_owned()]);
    }

    #[tokio::test]
    async fn dry_run_never_calls_the_provider_but_carries_over_metadata() {
        let provider = Arc::new(RecordingProvider::default());
        let dispatcher =
            ActionDispatcher::new(Arc::clone(&provider) as Arc<dyn ProviderClient>, Arc::new(LoggingRemediator));
        let profile = profile_with(BTreeMap::from([(ActionKind::Advisory, ActionSwitch::DryRun)]));
        let rule_type = rule_type_with(ActionConfig { advisory: Some(serde_json::json!({})), ..Default::default() });

        let outcome = dispatcher
            .dispatch(&profile, &rule_type, &entity(), None, &failed_outcome("would open"))
            .await
            .expect("dispatches");

        assert_eq!(outcome.alert_metadata, None);
        assert!(provider.advisories_opened.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn switch_off_short_circuits_and_carries_over_prior_metadata_verbatim() {
        let provider = Arc::new(RecordingProvider::default());
        let dispatcher =
            ActionDispatcher::new(Arc::clone(&provider) as Arc<dyn ProviderClient>, Arc::new(LoggingRemediator));
        let profile = profile_with(BTreeMap::from([(ActionKind::Advisory, ActionSwitch::Off)]));
        let rule_type = rule_type_with(ActionConfig { advisory: Some(serde_json::json!({})), ..Default::default() });
        let prior = RuleEvaluationRecord {
            profile_id: profile.id,
            rule_type_id: rule_type.id,
            entity_id: entity().id,
            verdict: Verdict::Failed,
            detail: EvaluationDetail::default(),
            evaluated_at: 0,
            alert_metadata: Some(serde_json::Value::String("advisory-1".to_owned())),
            remediation_metadata: None,
        };

        let outcome = dispatcher
            .dispatch(&profile, &rule_type, &entity(), Some(&prior), &passed_outcome())
            .await
            .expect("dispatches");

        assert_eq!(outcome.alert_metadata, prior.alert_metadata);
        assert!(provider.advisories_closed.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn pr_comment_fragments_from_two_rules_flush_into_one_review() {
        let provider = Arc::new(RecordingProvider::default());
        let dispatcher =
            ActionDispatcher::new(Arc::clone(&provider) as Arc<dyn ProviderClient>, Arc::new(LoggingRemediator));
        let profile = profile_with(BTreeMap::from([(ActionKind::PrComment, ActionSwitch::On)]));
        let first = rule_type_with(ActionConfig { pr_comment: Some(serde_json::json!({})), ..Default::default() });
        let mut second = rule_type_with(ActionConfig { pr_comment: Some(serde_json::json!({})), ..Default::default() });
        second.id = RuleTypeId::new(2).expect("non-zero");
        second.display_name = "license missing".to_owned();

        dispatcher.dispatch(&profile, &first, &entity(), None, &failed_outcome("secret found")).await.expect("dispatches");
        dispatcher.dispatch(&profile, &second, &entity(), None, &failed_outcome("no license")).await.expect("dispatches");
        dispatcher.flush_evaluation(&entity().id).await.expect("flushes");

        assert_eq!(provider.reviews.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn a_skipped_verdict_does_nothing_and_carries_over_metadata() {
        let provider = Arc::new(RecordingProvider::default());
        let dispatcher =
            ActionDispatcher::new(Arc::clone(&provider) as Arc<dyn ProviderClient>, Arc::new(LoggingRemediator));
        let profile = profile_with(BTreeMap::from([(ActionKind::Advisory, ActionSwitch::On)]));
        let rule_type = rule_type_with(ActionConfig { advisory: Some(serde_json::json!({})), ..Default::default() });
        let prior = RuleEvaluationRecord {
            profile_id: profile.id,
            rule_type_id: rule_type.id,
            entity_id: entity().id,
            verdict: Verdict::Failed,
            detail: EvaluationDetail::default(),
            evaluated_at: 0,
            alert_metadata: Some(serde_json::Value::String("advisory-1".to_owned())),
            remediation_metadata: None,
        };
        let skipped = PredicateOutcome { verdict: Verdict::Skipped, detail: EvaluationDetail::default() };

        let outcome =
            dispatcher.dispatch(&profile, &rule_type, &entity(), Some(&prior), &skipped).await.expect("dispatches");

        assert_eq!(outcome.alert_metadata, prior.alert_metadata);
        assert!(provider.advisories_opened.lock().expect("lock").is_empty());
        assert!(provider.advisories_closed.lock().expect("lock").is_empty());
    }
}
