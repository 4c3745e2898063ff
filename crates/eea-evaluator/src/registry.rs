//! The data-source registry: named, typed callables a rule type's `ingest`
//! spec declares and a predicate invokes under `ds.<registry>.<name>`.
//!
//! Adapted from `decision-gate-providers`'s `ProviderRegistry`: a
//! name-keyed map of boxed trait objects behind an allow/deny
//! [`eea_sandbox::SandboxAccessPolicy`]-shaped policy, plus a
//! `validate_declared` pass that mirrors `ProviderRegistry::validate_providers`
//! — checking every name a rule type references is registered before any
//! predicate runs, rather than failing lazily mid-evaluation.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use eea_policy_lang::EvalError;
use eea_policy_lang::FunctionRegistry;
use eea_policy_lang::eval::normalize_name;

use crate::EvaluatorError;

/// One named, typed callable invokable from a predicate under
/// `ds.<registry>.<name>`.
pub trait DataSource: Send + Sync {
    /// Validates call arguments before dispatch.
    ///
    /// # Errors
    /// Returns [`EvalError::InvalidArgs`] if the arguments are malformed.
    fn validate_args(&self, args: &[serde_json::Value]) -> Result<(), EvalError>;

    /// Invokes the data source, returning the value bound into the
    /// predicate's call expression.
    ///
    /// # Errors
    /// Returns [`EvalError::CallFailed`] if the call raises.
    fn call(&self, args: &[serde_json::Value]) -> Result<serde_json::Value, EvalError>;
}

/// Registry of data sources exposed to predicates under the `ds.` prefix.
#[derive(Default)]
pub struct DataSourceRegistry {
    /// Registered data sources, keyed by their normalized
    /// `ds.<registry>.<name>` name.
    sources: BTreeMap<String, Box<dyn DataSource>>,
}

impl DataSourceRegistry {
    /// Builds an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { sources: BTreeMap::new() }
    }

    /// Registers a data source under `ds.<registry>.<name>`, normalizing
    /// the name the same way the evaluator normalizes predicate call
    /// targets.
    pub fn register(&mut self, registry: &str, name: &str, source: impl DataSource + 'static) {
        let key = normalize_name(&format!("ds.{registry}.{name}"));
        self.sources.insert(key, Box::new(source));
    }

    /// Checks that every `ds.*` name in `declared` is registered,
    /// returning the first unregistered name found.
    ///
    /// # Errors
    /// Returns the offending name if any declared data source is missing.
    pub fn validate_declared<'a>(&self, declared: impl IntoIterator<Item = &'a str>) -> Result<(), String> {
        let mut missing = BTreeSet::new();
        for raw in declared {
            let name = normalize_name(raw);
            if !self.sources.contains_key(&name) {
                missing.insert(name);
            }
        }
        missing.into_iter().next().map_or(Ok(()), Err)
    }
}

impl FunctionRegistry for DataSourceRegistry {
    fn validate_args(&self, normalized_name: &str, args: &[serde_json::Value]) -> Result<(), EvalError> {
        let source = self
            .sources
            .get(normalized_name)
            .ok_or_else(|| EvalError::UnknownFunction(normalized_name.to_owned()))?;
        source.validate_args(args)
    }

    fn call(&self, normalized_name: &str, args: &[serde_json::Value]) -> Result<serde_json::Value, EvalError> {
        let source = self
            .sources
            .get(normalized_name)
            .ok_or_else(|| EvalError::UnknownFunction(normalized_name.to_owned()))?;
        source.call(args)
    }
}

/// A [`FunctionRegistry`] dispatching `ds.*` calls to a [`DataSourceRegistry`]
/// and every other call to the Policy Library sandbox registry, so a single
/// predicate program may reference both namespaces.
pub struct CompositeRegistry<'a, S> {
    /// The data-source half of the namespace.
    data_sources: &'a DataSourceRegistry,
    /// The Policy Library sandbox half of the namespace.
    sandbox: &'a S,
}

impl<'a, S: FunctionRegistry> CompositeRegistry<'a, S> {
    /// Builds a registry combining `data_sources` and `sandbox`.
    #[must_use]
    pub const fn new(data_sources: &'a DataSourceRegistry, sandbox: &'a S) -> Self {
        Self { data_sources, sandbox }
    }
}

impl<S: FunctionRegistry> FunctionRegistry for CompositeRegistry<'_, S> {
    fn validate_args(&self, normalized_name: &str, args: &[serde_json::Value]) -> Result<(), EvalError> {
        if normalized_name.starts_with("ds.") {
            self.data_sources.validate_args(normalized_name, args)
        } else {
            self.sandbox.validate_args(normalized_name, args)
        }
    }

    fn call(&self, normalized_name: &str, args: &[serde_json::Value]) -> Result<serde_json::Value, EvalError> {
        if normalized_name.starts_with("ds.") {
            self.data_sources.call(normalized_name, args)
        } else {
            self.sandbox.call(normalized_name, args)
        }
    }
}

/// Maps a missing-data-source name to an [`EvaluatorError`] attributed to
/// the declaring rule type.
#[must_use]
pub fn unregistered_data_source(
    rule_type_id: eea_core::RuleTypeId,
    data_source: String,
) -> EvaluatorError {
    EvaluatorError::UnregisteredDataSource { rule_type_id, data_source }
}

#[cfg(test)]
#[allow(
    clippy::missing_docs_in_private_items,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only helpers keep documentation concise and use expect for setup assertions."
)]
mod tests {
    use super::*;

    struct ConstantSource(serde_json::Value);

    impl DataSource for ConstantSource {
        fn validate_args(&self, _args: &[serde_json::Value]) -> Result<(), EvalError> {
            Ok(())
        }

        fn call(&self, _args: &[serde_json::Value]) -> Result<serde_json::Value, EvalError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn registered_names_are_normalized_before_lookup() {
        let mut registry = DataSourceRegistry::new();
        registry.register("Inventory", "Has-License", ConstantSource(serde_json::json!(true)));

        let result = registry.call("ds.inventory.has_license", &[]).expect("calls");
        assert_eq!(result, serde_json::json!(true));
    }

    #[test]
    fn validate_declared_reports_the_first_missing_name() {
        let mut registry = DataSourceRegistry::new();
        registry.register("inventory", "has_license", ConstantSource(serde_json::json!(true)));

        assert!(registry.validate_declared(["ds.inventory.has_license"]).is_ok());
        assert!(registry.validate_declared(["ds.inventory.missing"]).is_err());
    }
}
