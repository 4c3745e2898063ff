//! High-level predicate evaluation: combines the parser and evaluator to
//! implement the `deny_by_default` and `constraints` flavours from the
//! evaluator's predicate-language contract.

use eea_core::EvaluationDetail;
use eea_core::Verdict;

use crate::ast::Item;
use crate::ast::Program;
use crate::error::EvalError;
use crate::eval::Evaluator;
use crate::eval::FunctionRegistry;
use crate::eval::is_truthy;

/// Evaluation detail is bounded to this many characters; longer rendered
/// text falls back to a short summary form.
pub const MAX_DETAIL_CHARS: usize = 1024;

/// The outcome of running one predicate program against one input
/// document.
#[derive(Debug, Clone, PartialEq)]
pub struct PredicateOutcome {
    /// The resulting verdict.
    pub verdict: Verdict,
    /// Structured detail describing the outcome.
    pub detail: EvaluationDetail,
}

fn bound_message(message: String, fallback: &str) -> String {
    if message.chars().count() <= MAX_DETAIL_CHARS { message } else { fallback.to_owned() }
}

fn named_block_holds<R: FunctionRegistry>(
    program: &Program,
    name: &str,
    evaluator: &Evaluator<'_, R>,
) -> Result<Option<bool>, EvalError> {
    let mut found = false;
    let mut holds = false;
    for item in &program.items {
        if let Item::NamedBlock { name: block_name, conditions } = item {
            if block_name != name {
                continue;
            }
            found = true;
            let mut all_true = true;
            for condition in conditions {
                if !evaluator.eval_truthy(condition)? {
                    all_true = false;
                    break;
                }
            }
            holds = holds || all_true;
        }
    }
    Ok(if found { Some(holds) } else { None })
}

fn assignment_value<R: FunctionRegistry>(
    program: &Program,
    name: &str,
    evaluator: &Evaluator<'_, R>,
) -> Result<Option<serde_json::Value>, EvalError> {
    for item in &program.items {
        if let Item::Assignment { name: assign_name, expr } = item {
            if assign_name == name {
                return Ok(Some(evaluator.eval(expr)?));
            }
        }
    }
    Ok(None)
}

/// Evaluates a `deny_by_default`-flavoured program.
///
/// # Errors
/// Returns an [`EvalError`] if evaluating any expression fails (other than
/// the predicate's own `error` verdict, which is returned as `Ok` with
/// [`Verdict::Error`]).
pub fn evaluate_deny_by_default<R: FunctionRegistry>(
    program: &Program,
    registry: &R,
    input: &serde_json::Value,
) -> Result<PredicateOutcome, EvalError> {
    let evaluator = Evaluator::new(registry, input);

    let skip = named_block_holds(program, "skip", &evaluator)?.unwrap_or(false);

    let Some(allow) = named_block_holds(program, "allow", &evaluator)? else {
        return Ok(PredicateOutcome {
            verdict: Verdict::Error,
            detail: EvaluationDetail {
                message: "predicate does not define `allow`".to_owned(),
                output: None,
            },
        });
    };

    let message = match assignment_value(program, "message", &evaluator)? {
        Some(serde_json::Value::String(text)) => Some(text),
        Some(other) => Some(other.to_string()),
        None => None,
    };
    let output = assignment_value(program, "output", &evaluator)?;

    let verdict =
        if skip { Verdict::Skipped } else if allow { Verdict::Passed } else { Verdict::Failed };

    let default_message = match verdict {
        Verdict::Failed => "rule denied: allow evaluated to false".to_owned(),
        Verdict::Skipped => "rule skipped".to_owned(),
        Verdict::Passed | Verdict::Error => String::new(),
    };
    let rendered = message.unwrap_or(default_message);

    Ok(PredicateOutcome {
        verdict,
        detail: EvaluationDetail {
            message: bound_message(rendered, "rule denied: allow evaluated to false"),
            output,
        },
    })
}

/// Evaluates a `constraints`-flavoured program.
///
/// # Errors
/// Returns an [`EvalError`] if evaluating any expression fails.
pub fn evaluate_constraints<R: FunctionRegistry>(
    program: &Program,
    registry: &R,
    input: &serde_json::Value,
) -> Result<PredicateOutcome, EvalError> {
    let evaluator = Evaluator::new(registry, input);

    let skip = named_block_holds(program, "skip", &evaluator)?.unwrap_or(false);

    let mut messages = Vec::new();
    for item in &program.items {
        let Item::Violation { conditions, msg, output: _, skip: violation_skip } = item else {
            continue;
        };
        if let Some(skip_expr) = violation_skip {
            if evaluator.eval_truthy(skip_expr)? {
                continue;
            }
        }
        let mut fires = true;
        for condition in conditions {
            if !evaluator.eval_truthy(condition)? {
                fires = false;
                break;
            }
        }
        if !fires {
            continue;
        }
        let text = match msg {
            Some(expr) => match evaluator.eval(expr)? {
                serde_json::Value::String(text) => text,
                other => other.to_string(),
            },
            None => "constraint violated".to_owned(),
        };
        messages.push(text);
    }
    messages.sort();

    let verdict = if skip {
        Verdict::Skipped
    } else if messages.is_empty() {
        Verdict::Passed
    } else {
        Verdict::Failed
    };

    let joined = messages.join("; ");
    let output = if messages.is_empty() {
        None
    } else {
        Some(serde_json::Value::Array(
            messages.iter().cloned().map(serde_json::Value::String).collect(),
        ))
    };

    Ok(PredicateOutcome {
        verdict,
        detail: EvaluationDetail {
            message: bound_message(joined, "multiple constraints violated"),
            output,
        },
    })
}

#[must_use]
/// Returns whether `value` is truthy per the predicate language's rules,
/// re-exported for callers that need to evaluate raw library results.
pub fn value_is_truthy(value: &serde_json::Value) -> bool {
    is_truthy(value)
}
