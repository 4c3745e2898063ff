//! Tree-walking evaluator for parsed predicate programs.

use eea_core::comparator;

use crate::ast::Expr;
use crate::ast::PathSegment;
use crate::error::EvalError;

/// Normalizes a raw function-path segment for registry lookup: lowercases,
/// maps `-` to `_`, and strips any character outside `[a-z0-9_.]`.
#[must_use]
pub fn normalize_name(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .map(|c| if c == '-' { '_' } else { c })
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_' || *c == '.')
        .collect()
}

/// A callable exposed to predicates under a stable dotted namespace:
/// data-source registrations (`ds.<registry>.<name>`) and Policy Library
/// helpers (`file.*`, `jq.is_true`, ...) both implement this trait.
pub trait FunctionRegistry {
    /// Validates call arguments before dispatch.
    ///
    /// # Errors
    /// Returns [`EvalError::UnknownFunction`] if `normalized_name` is not
    /// registered, or [`EvalError::InvalidArgs`] if the arguments are
    /// malformed.
    fn validate_args(
        &self,
        normalized_name: &str,
        args: &[serde_json::Value],
    ) -> Result<(), EvalError>;

    /// Invokes the named function.
    ///
    /// # Errors
    /// Returns [`EvalError::CallFailed`] if the call raises; raised errors
    /// abort the enclosing predicate.
    fn call(
        &self,
        normalized_name: &str,
        args: &[serde_json::Value],
    ) -> Result<serde_json::Value, EvalError>;
}

/// A [`FunctionRegistry`] with no registered functions, useful for
/// evaluating predicates that perform no data-source or library calls.
pub struct EmptyRegistry;

impl FunctionRegistry for EmptyRegistry {
    fn validate_args(
        &self,
        normalized_name: &str,
        _args: &[serde_json::Value],
    ) -> Result<(), EvalError> {
        Err(EvalError::UnknownFunction(normalized_name.to_owned()))
    }

    fn call(
        &self,
        normalized_name: &str,
        _args: &[serde_json::Value],
    ) -> Result<serde_json::Value, EvalError> {
        Err(EvalError::UnknownFunction(normalized_name.to_owned()))
    }
}

/// Returns whether a JSON value is truthy under the predicate language's
/// rules: `false`/`null`/`0`/empty-string/empty-array/empty-object are
/// falsy, everything else is truthy.
#[must_use]
pub fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(value) => *value,
        serde_json::Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        serde_json::Value::String(value) => !value.is_empty(),
        serde_json::Value::Array(values) => !values.is_empty(),
        serde_json::Value::Object(values) => !values.is_empty(),
    }
}

/// Evaluates expressions against an implicit input document of shape
/// `{profile, ingested, output_format}`.
pub struct Evaluator<'a, R: FunctionRegistry> {
    registry: &'a R,
    input: &'a serde_json::Value,
}

impl<'a, R: FunctionRegistry> Evaluator<'a, R> {
    /// Builds an evaluator over `input`, dispatching function calls to
    /// `registry`.
    #[must_use]
    pub const fn new(registry: &'a R, input: &'a serde_json::Value) -> Self {
        Self { registry, input }
    }

    /// Evaluates an expression to a JSON value.
    ///
    /// # Errors
    /// Returns an [`EvalError`] if a path cannot be resolved or a function
    /// call fails.
    pub fn eval(&self, expr: &Expr) -> Result<serde_json::Value, EvalError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Array(items) => {
                let values =
                    items.iter().map(|item| self.eval(item)).collect::<Result<Vec<_>, _>>()?;
                Ok(serde_json::Value::Array(values))
            }
            Expr::Object(fields) => {
                let mut map = serde_json::Map::new();
                for (key, value) in fields {
                    map.insert(key.clone(), self.eval(value)?);
                }
                Ok(serde_json::Value::Object(map))
            }
            Expr::Path(segments) => self.eval_path(segments),
            Expr::Call { path, args } => self.eval_call(path, args),
            Expr::Compare { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                Ok(serde_json::Value::Bool(comparator::evaluate(*op, &left, &right).is_true()))
            }
            Expr::And(left, right) => {
                let left = self.eval(left)?;
                if !is_truthy(&left) {
                    return Ok(serde_json::Value::Bool(false));
                }
                let right = self.eval(right)?;
                Ok(serde_json::Value::Bool(is_truthy(&right)))
            }
            Expr::Or(left, right) => {
                let left = self.eval(left)?;
                if is_truthy(&left) {
                    return Ok(serde_json::Value::Bool(true));
                }
                let right = self.eval(right)?;
                Ok(serde_json::Value::Bool(is_truthy(&right)))
            }
            Expr::Not(inner) => {
                let value = self.eval(inner)?;
                Ok(serde_json::Value::Bool(!is_truthy(&value)))
            }
        }
    }

    /// Evaluates an expression and coerces the result to a boolean guard.
    ///
    /// # Errors
    /// Propagates any [`EvalError`] from evaluating the expression.
    pub fn eval_truthy(&self, expr: &Expr) -> Result<bool, EvalError> {
        self.eval(expr).map(|value| is_truthy(&value))
    }

    fn eval_path(&self, segments: &[PathSegment]) -> Result<serde_json::Value, EvalError> {
        let Some(PathSegment::Field(root)) = segments.first() else {
            return Err(EvalError::InvalidPath("path must start with a field".to_owned()));
        };
        if root != "input" {
            return Err(EvalError::InvalidPath(format!("unknown root `{root}`")));
        }
        let mut current = self.input.clone();
        for segment in &segments[1..] {
            current = match segment {
                PathSegment::Field(name) => current
                    .as_object()
                    .and_then(|object| object.get(name))
                    .cloned()
                    .ok_or_else(|| EvalError::InvalidPath(format!("no field `{name}`")))?,
                PathSegment::Index(index_expr) => {
                    let index_value = self.eval(index_expr)?;
                    index_into(&current, &index_value)?
                }
            };
        }
        Ok(current)
    }

    fn eval_call(
        &self,
        path: &[String],
        args: &[Expr],
    ) -> Result<serde_json::Value, EvalError> {
        let raw_name = path.join(".");
        let normalized = normalize_name(&raw_name);
        let arg_values =
            args.iter().map(|arg| self.eval(arg)).collect::<Result<Vec<_>, _>>()?;
        self.registry.validate_args(&normalized, &arg_values).map_err(|err| match err {
            EvalError::UnknownFunction(_) => EvalError::UnknownFunction(normalized.clone()),
            other => other,
        })?;
        self.registry.call(&normalized, &arg_values)
    }
}

fn index_into(
    value: &serde_json::Value,
    index: &serde_json::Value,
) -> Result<serde_json::Value, EvalError> {
    match (value, index) {
        (serde_json::Value::Array(items), serde_json::Value::Number(number)) => {
            let idx = number
                .as_u64()
                .and_then(|value| usize::try_from(value).ok())
                .ok_or_else(|| EvalError::InvalidPath("index must be a non-negative integer".to_owned()))?;
            items.get(idx).cloned().ok_or_else(|| EvalError::InvalidPath(format!("index {idx} out of bounds")))
        }
        (serde_json::Value::Object(object), serde_json::Value::String(key)) => object
            .get(key)
            .cloned()
            .ok_or_else(|| EvalError::InvalidPath(format!("no key `{key}`"))),
        _ => Err(EvalError::InvalidPath("cannot index this value with this key".to_owned())),
    }
}
