// crates/eea-core/src/lib.rs
// ============================================================================
// Crate: eea-core
// Description: Core data model, envelope, and trait interfaces for the
// Event Execution Aggregator and Rule Evaluation Pipeline.
// ============================================================================

//! ## Overview
//! `eea-core` defines the entity/profile/rule-type data model, the Entity
//! Envelope (C1) that travels between the aggregator and the evaluator, the
//! append-only evaluation record shapes, and the trait interfaces every
//! other crate in the workspace programs against: [`interfaces::EntityStore`],
//! [`interfaces::LockStore`], [`interfaces::FlushQueueStore`],
//! [`interfaces::EvaluationHistory`], [`interfaces::MessageBus`], and
//! [`interfaces::ProviderClient`].
//!
//! No concrete persistence, transport, or provider integration lives here;
//! see `eea-store-sqlite`, `eea-bus`, and the provider-specific client
//! crates.

pub mod comparator;
pub mod entity;
pub mod error;
pub mod identifiers;
pub mod interfaces;
pub mod profile;
pub mod record;
pub mod rule_type;

pub use comparator::Comparator;
pub use comparator::TriState;
pub use entity::Entity;
pub use entity::EntityEnvelope;
pub use entity::EntityType;
pub use entity::PropertyMap;
pub use entity::PropertyValue;
pub use error::CoreError;
pub use identifiers::CorrelationId;
pub use identifiers::EntityId;
pub use identifiers::FlusherKey;
pub use identifiers::ProfileId;
pub use identifiers::ProjectId;
pub use identifiers::ProviderId;
pub use identifiers::RuleTypeId;
pub use identifiers::SequenceNumber;
pub use profile::ActionKind;
pub use profile::ActionSwitch;
pub use profile::Profile;
pub use profile::RuleTypeRef;
pub use record::EvaluationDetail;
pub use record::EvaluationLock;
pub use record::FlushQueueEntry;
pub use record::RuleEvaluationRecord;
pub use record::Verdict;
pub use rule_type::IngestSpec;
pub use rule_type::OutputFormat;
pub use rule_type::PredicateFlavour;
pub use rule_type::RuleType;
pub use rule_type::Severity;

#[cfg(test)]
mod tests {
    use crate::entity::EntityEnvelope;
    use crate::entity::EntityType;
    use crate::identifiers::EntityId;
    use crate::identifiers::ProjectId;
    use crate::identifiers::ProviderId;
    use crate::identifiers::SequenceNumber;

    #[test]
    fn envelope_round_trips_through_wire_format() {
        let envelope = EntityEnvelope::build_message(
            EntityType::Repository,
            EntityId::new("entity-1").expect("non-empty id"),
            std::collections::BTreeMap::new(),
            ProjectId::new(1).expect("non-zero"),
            ProviderId::new("github").expect("non-empty id"),
            SequenceNumber::new(42),
        );

        let wire = envelope.to_wire().expect("serializes");
        let parsed = EntityEnvelope::parse(&wire).expect("parses");
        assert_eq!(envelope, parsed);
    }

    #[test]
    fn parse_rejects_malformed_payload() {
        let result = EntityEnvelope::parse(b"not json");
        assert!(result.is_err());
    }

    #[test]
    fn entity_type_tag_round_trips() {
        for entity_type in
            [EntityType::Repository, EntityType::Artifact, EntityType::PullRequest]
        {
            let tag = entity_type.tag();
            assert_eq!(EntityType::from_tag(tag), Some(entity_type));
        }
    }

    #[test]
    fn entity_type_from_tag_rejects_unknown_values() {
        assert_eq!(EntityType::from_tag("unknown"), None);
    }
}
