//! The ingest phase: populates the predicate's implicit input document and
//! virtual filesystem views before a rule type's predicate runs.

use eea_core::entity::Entity;
use eea_core::rule_type::IngestSpec;
use eea_sandbox::VirtualFilesystem;

use crate::EvaluatorError;

/// The materialized state a predicate evaluates against: the `ingested`
/// document merged into the implicit input, plus the filesystem views the
/// Policy Library's `file.*`/`base_file.*` helpers read from.
pub struct Ingested {
    /// The `input.ingested` document.
    pub document: serde_json::Value,
    /// The head (current) virtual filesystem view.
    pub head: VirtualFilesystem,
    /// The base (pre-change) virtual filesystem view, present only when
    /// `IngestSpec::requires_base_filesystem` is set and the source can
    /// supply one (e.g. a pull request's target branch).
    pub base: Option<VirtualFilesystem>,
}

/// Fetches the data a rule type's `ingest` spec requires for one entity.
///
/// Network calls to the upstream provider happen here, not inside the
/// predicate sandbox; providers are external collaborators
/// (`eea_core::interfaces::ProviderClient`) supplied by the deployment.
pub trait IngestSource: Send + Sync {
    /// Builds the ingested document and filesystem views for `entity`
    /// under `spec`.
    ///
    /// # Errors
    /// Returns [`EvaluatorError::Ingest`] if the upstream data cannot be
    /// fetched.
    fn ingest(&self, entity: &Entity, spec: &IngestSpec) -> Result<Ingested, EvaluatorError>;
}

/// An ingest source that performs no upstream fetch, exposing only the
/// entity's own property map as the ingested document and an empty
/// filesystem. Used for rule types whose `ingest` spec names no data
/// sources and needs no filesystem content, and by tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct PropertiesOnlyIngest;

impl IngestSource for PropertiesOnlyIngest {
    fn ingest(&self, entity: &Entity, spec: &IngestSpec) -> Result<Ingested, EvaluatorError> {
        let document = serde_json::Value::Object(
            entity.properties.iter().map(|(key, value)| (key.clone(), value.to_json())).collect(),
        );
        let base = if spec.requires_base_filesystem { Some(VirtualFilesystem::new()) } else { None };
        Ok(Ingested { document, head: VirtualFilesystem::new(), base })
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

    use eea_core::EntityType;
    use eea_core::entity::PropertyValue;
    use eea_core::identifiers::EntityId;
    use eea_core::identifiers::ProjectId;
    use eea_core::identifiers::ProviderId;

    use super::*;

    #[test]
    fn properties_only_ingest_exposes_the_entitys_properties() {
        let mut properties = BTreeMap::new();
        properties.insert("name".to_owned(), PropertyValue::Str("repo".to_owned()));
        let entity = Entity {
            id: EntityId::new("entity-1").expect("non-empty"),
            entity_type: EntityType::Repository,
            project_id: ProjectId::new(1).expect("non-zero"),
            provider_id: ProviderId::new("github").expect("non-empty"),
            properties,
        };

        let ingested = PropertiesOnlyIngest
            .ingest(&entity, &IngestSpec::default())
            .expect("ingests");
        assert_eq!(ingested.document, serde_json::json!({"name": "repo"}));
        assert!(ingested.base.is_none());
    }

    #[test]
    fn base_filesystem_is_populated_only_when_required() {
        let entity = Entity {
            id: EntityId::new("entity-1").expect("non-empty"),
            entity_type: EntityType::PullRequest,
            project_id: ProjectId::new(1).expect("non-zero"),
            provider_id: ProviderId::new("github").expect("non-empty"),
            properties: BTreeMap::new(),
        };
        let spec = IngestSpec { requires_base_filesystem: true, ..IngestSpec::default() };

        let ingested = PropertiesOnlyIngest.ingest(&entity, &spec).expect("ingests");
        assert!(ingested.base.is_some());
    }
}
