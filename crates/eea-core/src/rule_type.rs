//! Rule type templates: the checkable-property definitions profiles
//! reference.

use serde::Deserialize;
use serde::Serialize;

use crate::identifiers::RuleTypeId;

/// Severity of a rule type, used only for display and for lexicographic
/// tie-breaking in aggregated output; rule evaluation never branches on
/// this ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational only.
    Info,
    /// Low severity.
    Low,
    /// Medium severity.
    Medium,
    /// High severity.
    High,
    /// Critical severity.
    Critical,
}

/// The policy-language backend a rule type's predicate is written against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateFlavour {
    /// `allow`/`message`/`output`/`skip`-shaped predicate.
    DenyByDefault,
    /// `violations`-shaped predicate.
    Constraints,
}

/// How rendered evaluation detail should be formatted for consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Structured JSON, falling back to text on render failure.
    Json,
}

/// Names the data an evaluator must fetch before running a rule type's
/// predicate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestSpec {
    /// Named data sources the ingest phase must populate, in
    /// `ds.<registry>.<name>` form.
    #[serde(default)]
    pub data_sources: Vec<String>,
    /// Whether the ingest phase must also populate a base (pre-change)
    /// filesystem view, for diff contexts such as pull requests.
    #[serde(default)]
    pub requires_base_filesystem: bool,
}

/// Per-action-kind configuration a rule type carries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Configuration for the advisory/alert action kind, if declared.
    #[serde(default)]
    pub advisory: Option<serde_json::Value>,
    /// Configuration for the PR-comment action kind, if declared.
    #[serde(default)]
    pub pr_comment: Option<serde_json::Value>,
    /// Configuration for the remediation action kind, if declared.
    #[serde(default)]
    pub remediation: Option<serde_json::Value>,
}

/// A named, versioned template describing one checkable property of an
/// entity. Immutable once published; the schema tolerates unknown fields
/// so newer rule types can be loaded by older evaluators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleType {
    /// The rule type's identifier.
    pub id: RuleTypeId,
    /// The rule type's display name.
    pub display_name: String,
    /// Human-readable guidance shown alongside a failing verdict.
    pub guidance: String,
    /// The data the evaluator must fetch before running the predicate.
    pub ingest: IngestSpec,
    /// The predicate language flavour this rule type's program is written
    /// against.
    pub predicate_flavour: PredicateFlavour,
    /// The predicate program text.
    pub predicate: String,
    /// Per-action-kind configuration.
    pub actions: ActionConfig,
    /// The rule type's severity.
    pub severity: Severity,
    /// How rendered detail should be formatted.
    #[serde(default = "default_output_format")]
    pub output_format: OutputFormat,

    /// Unknown fields are tolerated rather than rejected, per the
    /// versioning-tolerance requirement.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

const fn default_output_format() -> OutputFormat {
    OutputFormat::Text
}
