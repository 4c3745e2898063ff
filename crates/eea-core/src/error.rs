//! Cross-cutting error taxonomy shared by every crate in the workspace.
//!
//! Each downstream crate additionally defines its own `thiserror`-derived
//! enum at its public boundary (`AggregatorError`, `EvaluatorError`, and so
//! on); `CoreError` covers the envelope and data-model errors that are
//! common to all of them.

use thiserror::Error;

/// Errors that can arise while building, parsing, or routing core data
/// types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An envelope could not be parsed: a required field was absent or the
    /// entity-type tag was unrecognized.
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope {
        /// Human-readable description of what was malformed.
        reason: String,
    },

    /// A rule definition could not be parsed or did not satisfy the
    /// schema's required fields.
    #[error("malformed rule type {rule_type_id}: {reason}")]
    MalformedRuleType {
        /// The rule type identifier the error pertains to, as written.
        rule_type_id: String,
        /// Human-readable description of what was malformed.
        reason: String,
    },

    /// An opaque metadata blob attached to a rule evaluation record could
    /// not be parsed.
    #[error("malformed metadata: {reason}")]
    MalformedMetadata {
        /// Human-readable description of what was malformed.
        reason: String,
    },
}
