//! Wires the Policy Library's capability helpers into an
//! `eea_policy_lang::FunctionRegistry` under their fixed namespaces, with
//! an allow/deny access policy gating which namespaces a given evaluation
//! may call.

use std::collections::BTreeSet;

use eea_policy_lang::EvalError;
use eea_policy_lang::FunctionRegistry;

use crate::github_actions;
use crate::http;
use crate::http::HttpSandboxConfig;
use crate::jq;
use crate::parse;
use crate::sbom;
use crate::vfs::VirtualFilesystem;

/// Controls which normalized function names a sandbox registry will
/// dispatch. An empty `allowlist` (`None`) means "all names not on the
/// denylist"; a present `allowlist` restricts to exactly that set.
#[derive(Debug, Clone, Default)]
pub struct SandboxAccessPolicy {
    /// When present, only these normalized names are callable.
    pub allowlist: Option<BTreeSet<String>>,
    /// These normalized names are never callable, even if present in
    /// `allowlist`.
    pub denylist: BTreeSet<String>,
}

impl SandboxAccessPolicy {
    /// Returns whether `normalized_name` may be called under this policy.
    #[must_use]
    pub fn is_allowed(&self, normalized_name: &str) -> bool {
        if self.denylist.contains(normalized_name) {
            return false;
        }
        match &self.allowlist {
            Some(allowed) => allowed.contains(normalized_name),
            None => true,
        }
    }
}

/// A [`FunctionRegistry`] implementation exposing the Policy Library's
/// `file.*`, `base_file.*`, `parse_yaml`, `parse_toml`, `jq.is_true`,
/// `github_workflow.ls_actions`, `file.deps`, and `http.send` capabilities.
pub struct SandboxRegistry {
    head: VirtualFilesystem,
    base: Option<VirtualFilesystem>,
    http_config: HttpSandboxConfig,
    policy: SandboxAccessPolicy,
}

impl SandboxRegistry {
    /// Builds a registry over the ingest phase's head filesystem view,
    /// with no base view and the default HTTP configuration and an
    /// allow-everything access policy.
    #[must_use]
    pub fn new(head: VirtualFilesystem) -> Self {
        Self {
            head,
            base: None,
            http_config: HttpSandboxConfig::default(),
            policy: SandboxAccessPolicy::default(),
        }
    }

    /// Attaches a base (pre-change) filesystem view, enabling `base_file.*`.
    #[must_use]
    pub fn with_base(mut self, base: VirtualFilesystem) -> Self {
        self.base = Some(base);
        self
    }

    /// Overrides the HTTP sandbox configuration.
    #[must_use]
    pub fn with_http_config(mut self, config: HttpSandboxConfig) -> Self {
        self.http_config = config;
        self
    }

    /// Overrides the access policy.
    #[must_use]
    pub fn with_policy(mut self, policy: SandboxAccessPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the process-wide count of requests blocked for resolving
    /// to a non-public address (property P6).
    #[must_use]
    pub fn blocked_request_count() -> u64 {
        http::BLOCKED_REQUESTS.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn filesystem_for(&self, base: bool) -> Result<&VirtualFilesystem, EvalError> {
        if base {
            self.base.as_ref().ok_or_else(|| EvalError::CallFailed {
                function: "base_file".to_owned(),
                reason: "base filesystem view is not available".to_owned(),
            })
        } else {
            Ok(&self.head)
        }
    }

    fn arg_str<'a>(args: &'a [serde_json::Value], index: usize, function: &str) -> Result<&'a str, EvalError> {
        args.get(index).and_then(serde_json::Value::as_str).ok_or_else(|| EvalError::InvalidArgs {
            function: function.to_owned(),
            reason: format!("argument {index} must be a string"),
        })
    }
}

fn call_failed(function: &str, error: impl std::fmt::Display) -> EvalError {
    EvalError::CallFailed { function: function.to_owned(), reason: error.to_string() }
}

impl FunctionRegistry for SandboxRegistry {
    fn validate_args(
        &self,
        normalized_name: &str,
        _args: &[serde_json::Value],
    ) -> Result<(), EvalError> {
        if !self.policy.is_allowed(normalized_name) {
            return Err(EvalError::InvalidArgs {
                function: normalized_name.to_owned(),
                reason: "denied by sandbox access policy".to_owned(),
            });
        }
        match normalized_name {
            "file.exists" | "file.read" | "file.ls" | "file.ls_glob" | "file.http_type"
            | "file.archive" | "file.deps" | "base_file.exists" | "base_file.read"
            | "base_file.ls" | "base_file.ls_glob" | "base_file.http_type"
            | "parse_yaml" | "parse_toml" | "jq.is_true" | "github_workflow.ls_actions"
            | "http.send" | "file.walk" | "base_file.walk" => Ok(()),
            other => Err(EvalError::UnknownFunction(other.to_owned())),
        }
    }

    fn call(
        &self,
        normalized_name: &str,
        args: &[serde_json::Value],
    ) -> Result<serde_json::Value, EvalError> {
        self.validate_args(normalized_name, args)?;

        let base = normalized_name.starts_with("base_file.");

        match normalized_name {
            "file.exists" | "base_file.exists" => {
                let path = Self::arg_str(args, 0, normalized_name)?;
                let vfs = self.filesystem_for(base)?;
                Ok(serde_json::Value::Bool(vfs.exists(path)))
            }
            "file.read" | "base_file.read" => {
                let path = Self::arg_str(args, 0, normalized_name)?;
                let vfs = self.filesystem_for(base)?;
                let contents = vfs.read(path).map_err(|err| call_failed(normalized_name, err))?;
                Ok(serde_json::Value::String(String::from_utf8_lossy(contents).into_owned()))
            }
            "file.ls" | "base_file.ls" => {
                let path = Self::arg_str(args, 0, normalized_name)?;
                let vfs = self.filesystem_for(base)?;
                Ok(serde_json::Value::Array(
                    vfs.ls(path).into_iter().map(serde_json::Value::String).collect(),
                ))
            }
            "file.ls_glob" | "base_file.ls_glob" => {
                let pattern = Self::arg_str(args, 0, normalized_name)?;
                let vfs = self.filesystem_for(base)?;
                let matches =
                    vfs.ls_glob(pattern).map_err(|err| call_failed(normalized_name, err))?;
                Ok(serde_json::Value::Array(matches.into_iter().map(serde_json::Value::String).collect()))
            }
            "file.walk" | "base_file.walk" => {
                let vfs = self.filesystem_for(base)?;
                Ok(serde_json::Value::Array(
                    vfs.walk().into_iter().map(serde_json::Value::String).collect(),
                ))
            }
            "file.http_type" | "base_file.http_type" => {
                let path = Self::arg_str(args, 0, normalized_name)?;
                let vfs = self.filesystem_for(base)?;
                Ok(serde_json::Value::String(vfs.http_type(path).to_owned()))
            }
            "file.archive" => {
                let prefix = Self::arg_str(args, 0, normalized_name)?;
                let bytes =
                    self.head.archive(prefix).map_err(|err| call_failed(normalized_name, err))?;
                Ok(serde_json::Value::String(base64_encode(&bytes)))
            }
            "file.deps" => {
                let path = Self::arg_str(args, 0, normalized_name)?;
                sbom::file_deps(&self.head, path).map_err(|err| call_failed(normalized_name, err))
            }
            "parse_yaml" => {
                let source = Self::arg_str(args, 0, normalized_name)?;
                parse::parse_yaml(source).map_err(|err| call_failed(normalized_name, err))
            }
            "parse_toml" => {
                let source = Self::arg_str(args, 0, normalized_name)?;
                parse::parse_toml(source).map_err(|err| call_failed(normalized_name, err))
            }
            "jq.is_true" => {
                let query = Self::arg_str(args, 1, normalized_name)?;
                let document = args.first().cloned().unwrap_or(serde_json::Value::Null);
                let result =
                    jq::is_true(&document, query).map_err(|err| call_failed(normalized_name, err))?;
                Ok(serde_json::Value::Bool(result))
            }
            "github_workflow.ls_actions" => {
                let path = Self::arg_str(args, 0, normalized_name)?;
                let actions = github_actions::ls_actions(&self.head, path)
                    .map_err(|err| call_failed(normalized_name, err))?;
                Ok(serde_json::Value::Array(actions.into_iter().map(serde_json::Value::String).collect()))
            }
            "http.send" => {
                let url = Self::arg_str(args, 0, normalized_name)?;
                let bytes = http::send(url, &self.http_config)
                    .map_err(|err| call_failed(normalized_name, err))?;
                Ok(serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned()))
            }
            other => Err(EvalError::UnknownFunction(other.to_owned())),
        }
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
