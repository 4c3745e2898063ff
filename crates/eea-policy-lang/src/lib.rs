// crates/eea-policy-lang/src/lib.rs
// ============================================================================
// Crate: eea-policy-lang
// Description: Lexer, parser, and evaluator for the predicate language
// backing the `deny_by_default` and `constraints` rule-evaluation flavours.
// ============================================================================

//! ## Overview
//! A small, deliberately non-Turing-complete expression language: no loops,
//! no user-defined functions, no mutation. Predicates declare boolean
//! `name { ... }` blocks and, for the `constraints` flavour,
//! `violation { ... }` blocks; both forms may call into a registered
//! [`eval::FunctionRegistry`] for data-source and policy-library
//! functions.
//!
//! Evaluation is pure given the same input document and registry return
//! values: see [`predicate::evaluate_deny_by_default`] and
//! [`predicate::evaluate_constraints`] for the two supported flavours.

pub mod ast;
pub mod error;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod predicate;

pub use ast::Program;
pub use error::DslError;
pub use error::EvalError;
pub use eval::EmptyRegistry;
pub use eval::FunctionRegistry;
pub use eval::normalize_name;
pub use parser::parse_program;
pub use predicate::PredicateOutcome;
pub use predicate::evaluate_constraints;
pub use predicate::evaluate_deny_by_default;

#[cfg(test)]
mod tests {
    use eea_core::Verdict;
    use serde_json::json;

    use super::evaluate_constraints;
    use super::evaluate_deny_by_default;
    use super::eval::EmptyRegistry;
    use super::parse_program;

    fn input(ingested: serde_json::Value) -> serde_json::Value {
        json!({"profile": {}, "ingested": ingested, "output_format": "text"})
    }

    #[test]
    fn deny_by_default_passes_when_allow_matches() {
        let program = parse_program(r#"allow { input.ingested.data == "foo" }"#)
            .expect("parses");
        let outcome =
            evaluate_deny_by_default(&program, &EmptyRegistry, &input(json!({"data": "foo"})))
                .expect("evaluates");
        assert_eq!(outcome.verdict, Verdict::Passed);
    }

    #[test]
    fn deny_by_default_fails_with_denied_detail_when_allow_does_not_match() {
        let program = parse_program(r#"allow { input.ingested.data == "foo" }"#)
            .expect("parses");
        let outcome =
            evaluate_deny_by_default(&program, &EmptyRegistry, &input(json!({"data": "bar"})))
                .expect("evaluates");
        assert_eq!(outcome.verdict, Verdict::Failed);
        assert!(outcome.detail.message.contains("denied"));
    }

    #[test]
    fn deny_by_default_errors_when_allow_is_undefined() {
        let program = parse_program(r#"message := "no rule here";"#).expect("parses");
        let outcome =
            evaluate_deny_by_default(&program, &EmptyRegistry, &input(json!({}))).expect("evaluates");
        assert_eq!(outcome.verdict, Verdict::Error);
    }

    #[test]
    fn multiple_allow_blocks_are_ored_together() {
        let program = parse_program(
            r#"
            allow { input.ingested.a == 1 }
            allow { input.ingested.b == 2 }
            "#,
        )
        .expect("parses");
        let outcome =
            evaluate_deny_by_default(&program, &EmptyRegistry, &input(json!({"a": 9, "b": 2})))
                .expect("evaluates");
        assert_eq!(outcome.verdict, Verdict::Passed);
    }

    #[test]
    fn constraints_reports_sorted_multi_violation_detail() {
        let program = parse_program(
            r#"
            violation {
                input.ingested.data == "foo";
                msg := "data should not contain foo";
            }
            violation {
                input.ingested.datum == "bar";
                msg := "datum should not contain bar";
            }
            "#,
        )
        .expect("parses");
        let outcome = evaluate_constraints(
            &program,
            &EmptyRegistry,
            &input(json!({"data": "foo", "datum": "bar"})),
        )
        .expect("evaluates");

        assert_eq!(outcome.verdict, Verdict::Failed);
        assert!(outcome.detail.message.contains("data should not contain foo"));
        assert!(outcome.detail.message.contains("datum should not contain bar"));
        let output = outcome.detail.output.expect("output present");
        let messages = output.as_array().expect("array");
        assert_eq!(
            messages,
            &vec![
                json!("data should not contain foo"),
                json!("datum should not contain bar"),
            ]
        );
    }

    #[test]
    fn constraints_passes_when_no_violation_fires() {
        let program = parse_program(
            r#"violation { input.ingested.data == "foo"; msg := "bad"; }"#,
        )
        .expect("parses");
        let outcome =
            evaluate_constraints(&program, &EmptyRegistry, &input(json!({"data": "ok"})))
                .expect("evaluates");
        assert_eq!(outcome.verdict, Verdict::Passed);
    }

    #[test]
    fn skip_block_short_circuits_to_skipped() {
        let program = parse_program(
            r#"
            skip { input.ingested.disabled == true }
            allow { input.ingested.data == "foo" }
            "#,
        )
        .expect("parses");
        let outcome = evaluate_deny_by_default(
            &program,
            &EmptyRegistry,
            &input(json!({"disabled": true, "data": "bar"})),
        )
        .expect("evaluates");
        assert_eq!(outcome.verdict, Verdict::Skipped);
    }
}
