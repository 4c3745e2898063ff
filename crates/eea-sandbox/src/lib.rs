// crates/eea-sandbox/src/lib.rs
// ============================================================================
// Crate: eea-sandbox
// Description: Policy Library sandbox helpers exposed to predicates:
// virtual filesystem, data parsing, domain helpers, SBOM extraction, and
// bounded/SSRF-safe HTTP.
// ============================================================================

//! ## Overview
//! Implements C5, the fixed set of sandbox helpers a predicate may call.
//! [`registry::SandboxRegistry`] implements
//! `eea_policy_lang::FunctionRegistry` and is the integration point handed
//! to the evaluator.
//!
//! Security posture: every helper here is read-only or bounded; the only
//! helper capable of reaching the network is `http.send`, which enforces
//! the SSRF guard in [`http::is_private_or_link_local`].

pub mod error;
pub mod github_actions;
pub mod http;
pub mod jq;
pub mod parse;
pub mod registry;
pub mod sbom;
pub mod vfs;

pub use error::SandboxError;
pub use http::HttpSandboxConfig;
pub use registry::SandboxAccessPolicy;
pub use registry::SandboxRegistry;
pub use vfs::VirtualFilesystem;

#[cfg(test)]
mod tests {
    use eea_policy_lang::evaluate_deny_by_default;
    use eea_policy_lang::parse_program;

    use super::SandboxRegistry;
    use super::VirtualFilesystem;

    #[test]
    fn predicate_can_call_jq_is_true_through_the_registry() {
        let registry = SandboxRegistry::new(VirtualFilesystem::new());
        let program = parse_program(
            r#"allow { jq.is_true(input.ingested, "$.items[*].enabled") }"#,
        )
        .expect("parses");
        let input = serde_json::json!({
            "profile": {},
            "ingested": {"items": [{"enabled": false}, {"enabled": true}]},
            "output_format": "text",
        });
        let outcome =
            evaluate_deny_by_default(&program, &registry, &input).expect("evaluates");
        assert_eq!(outcome.verdict, eea_core::Verdict::Passed);
    }

    #[test]
    fn predicate_calling_http_send_to_loopback_fails_evaluation() {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("binds");
        let addr = server.server_addr();
        let registry = SandboxRegistry::new(VirtualFilesystem::new());
        let program = parse_program(&format!(
            r#"allow {{ http.send("http://{addr}/") == "ok" }}"#
        ))
        .expect("parses");
        let input = serde_json::json!({"profile": {}, "ingested": {}, "output_format": "text"});
        let result = evaluate_deny_by_default(&program, &registry, &input);
        assert!(result.is_err());
    }
}
