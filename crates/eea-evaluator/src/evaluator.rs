//! The rule evaluator's per-rule state machine (C4): `idle -> ingesting ->
//! evaluating -> acting -> recorded`. Any failure short-circuits straight
//! to `recorded` with a terminal verdict rather than aborting the rest of
//! the profile's rule types.

use std::sync::Arc;
use std::time::Duration;

use eea_core::EvaluationDetail;
use eea_core::Profile;
use eea_core::RuleEvaluationRecord;
use eea_core::RuleType;
use eea_core::Verdict;
use eea_core::entity::Entity;
use eea_core::entity::EntityEnvelope;
use eea_core::entity::EntityType;
use eea_core::entity::PropertyValue;
use eea_core::interfaces::EvaluationHistory;
use eea_core::profile::RuleTypeRef;
use eea_core::rule_type::OutputFormat;
use eea_core::rule_type::PredicateFlavour;
use eea_policy_lang::evaluate_constraints;
use eea_policy_lang::evaluate_deny_by_default;
use eea_policy_lang::parse_program;
use eea_sandbox::HttpSandboxConfig;
use eea_sandbox::SandboxRegistry;

use crate::EvaluatorError;
use crate::catalog::RuleCatalog;
use crate::dispatch::ActionDispatch;
use crate::dispatch::DispatchOutcome;
use crate::ingest::IngestSource;
use crate::registry::CompositeRegistry;
use crate::registry::DataSourceRegistry;
use crate::registry::unregistered_data_source;

/// Current time in milliseconds since the Unix epoch, saturating rather
/// than panicking on overflow.
fn now_millis() -> i64 {
    i64::try_from(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|duration| duration.as_millis())
            .unwrap_or(0),
    )
    .unwrap_or(i64::MAX)
}

/// The property name a pull request's upstream number is stored under.
const PR_NUMBER_PROPERTY: &str = "number";

/// The `output_format` tag handed into a predicate's implicit input
/// document.
const fn output_format_tag(format: OutputFormat) -> &'static str {
    match format {
        OutputFormat::Text => "text",
        OutputFormat::Json => "json",
    }
}

/// Builds the synthetic entity a predicate runs against from an envelope's
/// identifying properties. The ingest phase is responsible for refreshing
/// operational properties beyond what the envelope carries.
fn entity_from_envelope(envelope: &EntityEnvelope) -> Entity {
    Entity {
        id: envelope.entity_id.clone(),
        entity_type: envelope.entity_type,
        project_id: envelope.project_id,
        provider_id: envelope.provider_id.clone(),
        properties: envelope.identifying_properties.clone(),
    }
}

/// Returns the carried-over alert/remediation metadata for a record that
/// short-circuits before `acting` runs: unchanged from the prior record,
/// since no external side effect occurred.
fn carried_over_metadata(
    prior: Option<&RuleEvaluationRecord>,
) -> (Option<serde_json::Value>, Option<serde_json::Value>) {
    prior.map_or((None, None), |record| {
        (record.alert_metadata.clone(), record.remediation_metadata.clone())
    })
}

/// Evaluates, for one entity envelope, every rule type named by every
/// profile that applies to the envelope's entity type, recording each
/// outcome.
pub struct RuleEvaluator {
    /// Profile and rule-type lookup.
    catalog: Arc<dyn RuleCatalog>,
    /// Named data sources predicates may call under `ds.*`.
    data_sources: Arc<DataSourceRegistry>,
    /// Fetches the data a rule type's predicate needs before it runs.
    ingest: Arc<dyn IngestSource>,
    /// Issues the external action a verdict calls for.
    dispatch: Arc<dyn ActionDispatch>,
    /// Append-only evaluation history.
    history: Arc<dyn EvaluationHistory>,
    /// Per-rule wall-clock evaluation budget.
    per_rule_timeout: Duration,
    /// HTTP sandbox configuration threaded into every evaluation's
    /// `http.send` capability.
    http_config: HttpSandboxConfig,
}

impl RuleEvaluator {
    /// Builds an evaluator from its collaborators, using the default HTTP
    /// sandbox configuration.
    #[must_use]
    pub fn new(
        catalog: Arc<dyn RuleCatalog>,
        data_sources: Arc<DataSourceRegistry>,
        ingest: Arc<dyn IngestSource>,
        dispatch: Arc<dyn ActionDispatch>,
        history: Arc<dyn EvaluationHistory>,
        per_rule_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            data_sources,
            ingest,
            dispatch,
            history,
            per_rule_timeout,
            http_config: HttpSandboxConfig::default(),
        }
    }

    /// Overrides the HTTP sandbox configuration.
    #[must_use]
    pub fn with_http_config(mut self, http_config: HttpSandboxConfig) -> Self {
        self.http_config = http_config;
        self
    }

    /// Evaluates every applicable profile's rule types against the entity
    /// named by `envelope`, recording each outcome, and returns the
    /// recorded set.
    ///
    /// Per-rule failures (compile errors, timeouts, ingest failures,
    /// unregistered data sources) never abort the loop: they are recorded
    /// as `error` verdicts for their own rule and evaluation continues.
    /// Only a failure to persist a record propagates, since that leaves
    /// the caller unable to trust this envelope has been durably handled.
    ///
    /// # Errors
    /// Returns [`EvaluatorError::Store`] if writing a record fails.
    pub async fn evaluate_envelope(
        &self,
        envelope: &EntityEnvelope,
    ) -> Result<Vec<RuleEvaluationRecord>, EvaluatorError> {
        let entity = entity_from_envelope(envelope);
        let profiles = self.catalog.profiles_for(envelope.entity_type, envelope.project_id);

        let mut records = Vec::new();
        for profile in &profiles {
            for rule_ref in &profile.rule_types {
                let Some(rule_type) = self.catalog.rule_type(rule_ref.rule_type_id) else {
                    tracing::warn!(
                        rule_type_id = %rule_ref.rule_type_id,
                        "rule type not published, skipping"
                    );
                    continue;
                };

                let record = self.evaluate_rule(profile, rule_ref, &rule_type, &entity).await;
                self.history.record(record.clone()).await?;
                records.push(record);
            }
        }

        if let Err(reason) = self.dispatch.flush_evaluation(&entity.id).await {
            tracing::warn!(entity_id = %entity.id, %reason, "shared action context flush failed");
        }

        Ok(records)
    }

    /// Runs one rule type's full state machine against `entity`, never
    /// returning an error: every failure mode is folded into the returned
    /// record's verdict and detail.
    async fn evaluate_rule(
        &self,
        profile: &Profile,
        rule_ref: &RuleTypeRef,
        rule_type: &RuleType,
        entity: &Entity,
    ) -> RuleEvaluationRecord {
        let prior = match self
            .history
            .get_latest(profile.id, rule_type.id, &entity.id)
            .await
        {
            Ok(prior) => prior,
            Err(source) => {
                tracing::warn!(%source, "failed to read prior evaluation record, treating as absent");
                None
            }
        };

        if let Err(error) = check_pr_number_range(entity) {
            return self.terminal_record(profile, rule_type, entity, &error, prior.as_ref());
        }

        if let Err(missing) =
            self.data_sources.validate_declared(rule_type.ingest.data_sources.iter().map(String::as_str))
        {
            let error = unregistered_data_source(rule_type.id, missing);
            return self.terminal_record(profile, rule_type, entity, &error, prior.as_ref());
        }

        let outcome = match self
            .run_predicate(rule_type.clone(), rule_ref.parameters.clone(), entity.clone())
            .await
        {
            Ok(outcome) => outcome,
            Err(error) => {
                return self.terminal_record(profile, rule_type, entity, &error, prior.as_ref());
            }
        };

        let skip_acting = outcome.verdict == Verdict::Passed
            && prior.as_ref().is_some_and(|record| record.verdict == Verdict::Passed);

        let (alert_metadata, remediation_metadata) = if skip_acting {
            carried_over_metadata(prior.as_ref())
        } else {
            match self.dispatch.dispatch(profile, rule_type, entity, prior.as_ref(), &outcome).await {
                Ok(DispatchOutcome { alert_metadata, remediation_metadata }) => {
                    (alert_metadata, remediation_metadata)
                }
                Err(reason) => {
                    let error = EvaluatorError::Action(reason);
                    return self.terminal_record(profile, rule_type, entity, &error, prior.as_ref());
                }
            }
        };

        RuleEvaluationRecord {
            profile_id: profile.id,
            rule_type_id: rule_type.id,
            entity_id: entity.id.clone(),
            verdict: outcome.verdict,
            detail: outcome.detail,
            evaluated_at: now_millis(),
            alert_metadata,
            remediation_metadata,
        }
    }

    /// Builds a terminal `error` record for a rule that short-circuited
    /// before `acting`, carrying over the prior record's side-effect
    /// metadata unchanged.
    fn terminal_record(
        &self,
        profile: &Profile,
        rule_type: &RuleType,
        entity: &Entity,
        error: &EvaluatorError,
        prior: Option<&RuleEvaluationRecord>,
    ) -> RuleEvaluationRecord {
        let (alert_metadata, remediation_metadata) = carried_over_metadata(prior);
        RuleEvaluationRecord {
            profile_id: profile.id,
            rule_type_id: rule_type.id,
            entity_id: entity.id.clone(),
            verdict: Verdict::Error,
            detail: EvaluationDetail { message: error.to_string(), output: None },
            evaluated_at: now_millis(),
            alert_metadata,
            remediation_metadata,
        }
    }

    /// Ingests the data a rule type's predicate needs, compiles the
    /// predicate, and evaluates it, bounded by [`Self::per_rule_timeout`].
    ///
    /// Runs on a blocking-pool thread since ingest and predicate
    /// evaluation are both synchronous; the timeout is enforced by racing
    /// the blocking task against a timer rather than by cooperative
    /// cancellation, since a predicate program cannot loop (the language
    /// has no loop construct) and the only unbounded step is ingest's own
    /// network access.
    async fn run_predicate(
        &self,
        rule_type: RuleType,
        parameters: serde_json::Map<String, serde_json::Value>,
        entity: Entity,
    ) -> Result<eea_policy_lang::PredicateOutcome, EvaluatorError> {
        let data_sources = Arc::clone(&self.data_sources);
        let ingest = Arc::clone(&self.ingest);
        let http_config = self.http_config.clone();

        let handle = tokio::task::spawn_blocking(move || -> Result<eea_policy_lang::PredicateOutcome, EvaluatorError> {
            let ingested = ingest.ingest(&entity, &rule_type.ingest)?;

            let mut sandbox = SandboxRegistry::new(ingested.head).with_http_config(http_config);
            if let Some(base) = ingested.base {
                sandbox = sandbox.with_base(base);
            }
            let composite = CompositeRegistry::new(&data_sources, &sandbox);

            let document = serde_json::json!({
                "profile": parameters,
                "ingested": ingested.document,
                "output_format": output_format_tag(rule_type.output_format),
            });

            let program = parse_program(&rule_type.predicate)?;
            let outcome = match rule_type.predicate_flavour {
                PredicateFlavour::DenyByDefault => evaluate_deny_by_default(&program, &composite, &document)?,
                PredicateFlavour::Constraints => evaluate_constraints(&program, &composite, &document)?,
            };
            Ok(outcome)
        });

        match tokio::time::timeout(self.per_rule_timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(EvaluatorError::Eval(eea_policy_lang::EvalError::CallFailed {
                function: "predicate evaluation".to_owned(),
                reason: join_error.to_string(),
            })),
            Err(_elapsed) => Err(EvaluatorError::Timeout),
        }
    }
}

/// Checks a pull-request entity's upstream number against the
/// platform-independent 32-bit range every supported provider's PR
/// numbering fits within. `isize` is 64 bits wide on every host this
/// workspace targets, so checking against it would never reject a value
/// an `i64` property can hold; `i32` is the bound the range check
/// actually intends.
fn check_pr_number_range(entity: &Entity) -> Result<(), EvaluatorError> {
    if entity.entity_type != EntityType::PullRequest {
        return Ok(());
    }
    let Some(PropertyValue::Int(number)) = entity.property(PR_NUMBER_PROPERTY) else {
        return Ok(());
    };
    i32::try_from(*number).map(|_| ()).map_err(|_| EvaluatorError::PrNumberOutOfRange)
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
    use std::sync::Mutex;

    use async_trait::async_trait;
    use eea_core::EntityType;
    use eea_core::identifiers::EntityId;
    use eea_core::identifiers::ProfileId;
    use eea_core::identifiers::ProjectId;
    use eea_core::identifiers::ProviderId;
    use eea_core::identifiers::RuleTypeId;
    use eea_core::interfaces::StoreError;
    use eea_core::profile::ActionSwitch;
    use eea_core::rule_type::ActionConfig;
    use eea_core::rule_type::IngestSpec;
    use eea_core::rule_type::Severity;

    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::dispatch::NoopDispatch;
    use crate::ingest::PropertiesOnlyIngest;

    /// An in-memory history store, sufficient for these tests.
    #[derive(Default)]
    struct MemoryHistory {
        records: Mutex<Vec<RuleEvaluationRecord>>,
    }

    #[async_trait]
    impl EvaluationHistory for MemoryHistory {
        async fn record(&self, record: RuleEvaluationRecord) -> Result<(), StoreError> {
            self.records.lock().expect("lock").push(record);
            Ok(())
        }

        async fn get_latest(
            &self,
            profile_id: ProfileId,
            rule_type_id: RuleTypeId,
            entity_id: &EntityId,
        ) -> Result<Option<RuleEvaluationRecord>, StoreError> {
            Ok(self
                .records
                .lock()
                .expect("lock")
                .iter()
                .rev()
                .find(|record| {
                    record.profile_id == profile_id
                        && record.rule_type_id == rule_type_id
                        && &record.entity_id == entity_id
                })
                .cloned())
        }
    }

    fn rule_type(id: u64, predicate: &str) -> RuleType {
        RuleType {
            id: RuleTypeId::new(id).expect("non-zero"),
            display_name: "has a license file".to_owned(),
            guidance: "add a LICENSE file".to_owned(),
            ingest: IngestSpec::default(),
            predicate_flavour: PredicateFlavour::DenyByDefault,
            predicate: predicate.to_owned(),
            actions: ActionConfig::default(),
            severity: Severity::Medium,
            output_format: OutputFormat::Text,
            extra: serde_json::Map::new(),
        }
    }

    fn profile(id: u64, project_id: u64, rule_type_id: u64) -> Profile {
        Profile {
            id: ProfileId::new(id).expect("non-zero"),
            project_id: ProjectId::new(project_id).expect("non-zero"),
            entity_types: vec![EntityType::Repository, EntityType::PullRequest],
            rule_types: vec![RuleTypeRef {
                rule_type_id: RuleTypeId::new(rule_type_id).expect("non-zero"),
                parameters: serde_json::Map::new(),
            }],
            action_switches: BTreeMap::from([(
                eea_core::profile::ActionKind::Advisory,
                ActionSwitch::On,
            )]),
        }
    }

    fn envelope(entity_type: EntityType, properties: eea_core::entity::PropertyMap) -> EntityEnvelope {
        EntityEnvelope::build_message(
            entity_type,
            EntityId::new("entity-1").expect("non-empty"),
            properties,
            ProjectId::new(1).expect("non-zero"),
            ProviderId::new("github").expect("non-empty"),
            eea_core::identifiers::SequenceNumber::new(1),
        )
    }

    fn build_evaluator(profiles: Vec<Profile>, rule_types: Vec<RuleType>) -> RuleEvaluator {
        RuleEvaluator::new(
            Arc::new(StaticCatalog::new(profiles, rule_types)),
            Arc::new(DataSourceRegistry::new()),
            Arc::new(PropertiesOnlyIngest),
            Arc::new(NoopDispatch),
            Arc::new(MemoryHistory::default()),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn a_passing_predicate_is_recorded_with_a_passed_verdict() {
        let evaluator = build_evaluator(
            vec![profile(1, 1, 1)],
            vec![rule_type(1, r#"allow { input.ingested.name == "repo" }"#)],
        );
        let mut properties = BTreeMap::new();
        properties.insert("name".to_owned(), PropertyValue::Str("repo".to_owned()));
        let records =
            evaluator.evaluate_envelope(&envelope(EntityType::Repository, properties)).await.expect("evaluates");

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].verdict, Verdict::Passed);
    }

    #[tokio::test]
    async fn a_pull_request_number_outside_i32_range_is_recorded_as_an_error() {
        let evaluator = build_evaluator(
            vec![profile(1, 1, 1)],
            vec![rule_type(1, r#"allow { true }"#)],
        );
        let mut properties = BTreeMap::new();
        properties.insert(PR_NUMBER_PROPERTY.to_owned(), PropertyValue::Int(i64::from(i32::MAX) + 1));
        let records =
            evaluator.evaluate_envelope(&envelope(EntityType::PullRequest, properties)).await.expect("evaluates");

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].verdict, Verdict::Error);
        assert!(records[0].detail.message.contains("pr_number_out_of_range"));
    }

    #[tokio::test]
    async fn acting_is_skipped_when_verdict_and_prior_both_passed() {
        let evaluator = build_evaluator(
            vec![profile(1, 1, 1)],
            vec![rule_type(1, r#"allow { true }"#)],
        );
        let entity_envelope = envelope(EntityType::Repository, BTreeMap::new());

        let first = evaluator.evaluate_envelope(&entity_envelope).await.expect("evaluates");
        let second = evaluator.evaluate_envelope(&entity_envelope).await.expect("evaluates");

        assert_eq!(first[0].verdict, Verdict::Passed);
        assert_eq!(second[0].verdict, Verdict::Passed);
        assert_eq!(second[0].alert_metadata, first[0].alert_metadata);
    }

    #[tokio::test]
    async fn a_rule_type_referencing_an_unregistered_data_source_records_an_error_without_aborting_others() {
        let mut first = rule_type(1, r#"allow { ds.inventory.has_license() }"#);
        first.ingest.data_sources = vec!["ds.inventory.has_license".to_owned()];
        let second = rule_type(2, r#"allow { true }"#);

        let mut applied_profile = profile(1, 1, 1);
        applied_profile.rule_types.push(RuleTypeRef {
            rule_type_id: RuleTypeId::new(2).expect("non-zero"),
            parameters: serde_json::Map::new(),
        });

        let evaluator = build_evaluator(vec![applied_profile], vec![first, second]);
        let records = evaluator
            .evaluate_envelope(&envelope(EntityType::Repository, BTreeMap::new()))
            .await
            .expect("evaluates");

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].verdict, Verdict::Error);
        assert_eq!(records[1].verdict, Verdict::Passed);
    }
}
