//! Profiles: ordered rule-type bundles with per-action switches.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::entity::EntityType;
use crate::identifiers::ProfileId;
use crate::identifiers::ProjectId;
use crate::identifiers::RuleTypeId;

/// The three states an action kind can be switched to for a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionSwitch {
    /// The action is dispatched normally.
    On,
    /// The action's intent is logged but the provider is not called.
    DryRun,
    /// The action kind is short-circuited entirely.
    Off,
}

/// The action kinds a profile can independently switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Provider-side advisory / alert.
    Advisory,
    /// Pull-request review comment.
    PrComment,
    /// Provider-defined remediation mutation.
    Remediation,
}

/// One `(rule type, parameters)` pair referenced by a profile, in the
/// order the profile declares it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleTypeRef {
    /// The referenced rule type.
    pub rule_type_id: RuleTypeId,
    /// Parameters bound into the predicate's `profile` input field.
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

/// An ordered bundle of rule-type references plus per-action-kind switch
/// settings, targeting a project and a subset of entity types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// The profile's identifier.
    pub id: ProfileId,
    /// The administrative project this profile targets.
    pub project_id: ProjectId,
    /// The entity types this profile applies to.
    pub entity_types: Vec<EntityType>,
    /// The rule types this profile evaluates, in declaration order.
    pub rule_types: Vec<RuleTypeRef>,
    /// Per-action-kind switch settings.
    pub action_switches: BTreeMap<ActionKind, ActionSwitch>,
}

impl Profile {
    /// Returns the switch setting for an action kind, defaulting to `Off`
    /// when the profile does not mention it.
    #[must_use]
    pub fn switch(&self, kind: ActionKind) -> ActionSwitch {
        self.action_switches.get(&kind).copied().unwrap_or(ActionSwitch::Off)
    }

    /// Returns whether this profile applies to the given entity type.
    #[must_use]
    pub fn applies_to(&self, entity_type: EntityType) -> bool {
        self.entity_types.contains(&entity_type)
    }
}
