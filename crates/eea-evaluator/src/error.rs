//! The crate's public-boundary error type.

use thiserror::Error;

/// Errors surfaced by the rule evaluator's public operations.
#[derive(Debug, Error)]
pub enum EvaluatorError {
    /// A rule type declared an ingest data source with no registered
    /// implementation.
    #[error("rule type {rule_type_id} declares unregistered data source: {data_source}")]
    UnregisteredDataSource {
        /// The rule type that declared the missing data source.
        rule_type_id: eea_core::RuleTypeId,
        /// The unregistered `ds.<registry>.<name>` reference.
        data_source: String,
    },

    /// The predicate program failed to compile.
    #[error("predicate compile error: {0}")]
    Compile(#[from] eea_policy_lang::DslError),

    /// Evaluating the compiled predicate raised an error outside of the
    /// predicate's own `error` verdict (e.g. a sandbox call failed).
    #[error("predicate evaluation error: {0}")]
    Eval(#[from] eea_policy_lang::EvalError),

    /// Evaluation exceeded its configured per-rule wall-clock budget.
    #[error("predicate evaluation timed out")]
    Timeout,

    /// An entity of type `pull_request` carried a PR number outside the
    /// host platform's native integer range.
    #[error("pr_number_out_of_range")]
    PrNumberOutOfRange,

    /// The ingest phase failed to materialize the data a predicate needs.
    #[error("ingest failed: {0}")]
    Ingest(String),

    /// The action dispatcher rejected or failed to apply a verdict's
    /// configured action.
    #[error("action dispatch failed: {0}")]
    Action(String),

    /// The backing evaluation-history store rejected or failed an
    /// operation.
    #[error("store error: {0}")]
    Store(#[from] eea_core::interfaces::StoreError),
}
