//! Lookup of the profile and rule-type definitions an evaluation runs
//! against. Profile/rule-type authoring and storage are external
//! collaborators (schema migration and physical layout are out of scope);
//! this trait is the seam the evaluator programs against instead of
//! depending on any particular catalog backend.

use eea_core::Profile;
use eea_core::RuleType;
use eea_core::entity::EntityType;
use eea_core::identifiers::ProjectId;
use eea_core::identifiers::RuleTypeId;

/// Read access to published profiles and rule types.
pub trait RuleCatalog: Send + Sync {
    /// Returns every profile targeting `project_id` that applies to
    /// `entity_type`.
    fn profiles_for(&self, entity_type: EntityType, project_id: ProjectId) -> Vec<Profile>;

    /// Returns a rule type by id, if published.
    fn rule_type(&self, rule_type_id: RuleTypeId) -> Option<RuleType>;
}

/// An in-memory catalog over a fixed set of profiles and rule types,
/// suitable for tests and single-tenant deployments that load their
/// catalog from a static configuration document at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    /// The profiles this catalog serves.
    profiles: Vec<Profile>,
    /// The rule types this catalog serves, keyed by id.
    rule_types: std::collections::BTreeMap<RuleTypeId, RuleType>,
}

impl StaticCatalog {
    /// Builds a catalog from a fixed profile and rule-type set.
    #[must_use]
    pub fn new(profiles: Vec<Profile>, rule_types: Vec<RuleType>) -> Self {
        Self {
            profiles,
            rule_types: rule_types.into_iter().map(|rule_type| (rule_type.id, rule_type)).collect(),
        }
    }
}

impl RuleCatalog for StaticCatalog {
    fn profiles_for(&self, entity_type: EntityType, project_id: ProjectId) -> Vec<Profile> {
        self.profiles
            .iter()
            .filter(|profile| profile.project_id == project_id && profile.applies_to(entity_type))
            .cloned()
            .collect()
    }

    fn rule_type(&self, rule_type_id: RuleTypeId) -> Option<RuleType> {
        self.rule_types.get(&rule_type_id).cloned()
    }
}
