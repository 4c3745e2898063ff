//! `jq.is_true` — a boolean selection predicate over JSON, implemented
//! with JSONPath rather than an embedded jq engine (see `DESIGN.md` for
//! the substitution rationale).

use crate::error::SandboxError;

/// Evaluates `query` as a boolean JSONPath expression against `value` and
/// returns whether it selects at least one `true` result.
///
/// # Errors
/// Returns [`SandboxError::Jq`] if `query` is not a valid JSONPath
/// expression, or if it selects any value that is not a JSON boolean.
pub fn is_true(value: &serde_json::Value, query: &str) -> Result<bool, SandboxError> {
    let selected =
        jsonpath_lib::select(value, query).map_err(|source| SandboxError::Jq(source.to_string()))?;
    let mut any_true = false;
    for item in selected {
        match item.as_bool() {
            Some(true) => any_true = true,
            Some(false) => {}
            None => {
                return Err(SandboxError::Jq(format!(
                    "query {query:?} selected a non-boolean result: {item}"
                )));
            }
        }
    }
    Ok(any_true)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::is_true;

    #[test]
    fn selects_truthy_boolean_field() {
        let document = json!({"items": [{"enabled": true}, {"enabled": false}]});
        assert!(is_true(&document, "$.items[*].enabled").expect("evaluates"));
    }

    #[test]
    fn returns_false_when_nothing_matches() {
        let document = json!({"items": []});
        assert!(!is_true(&document, "$.items[*].enabled").expect("evaluates"));
    }

    #[test]
    fn rejects_malformed_query() {
        let document = json!({});
        assert!(is_true(&document, "$[").is_err());
    }

    #[test]
    fn rejects_a_non_boolean_selection() {
        let document = json!({"name": "repo"});
        assert!(is_true(&document, "$.name").is_err());
    }
}
