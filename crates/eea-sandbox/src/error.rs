//! Error taxonomy for the Policy Library's sandbox helpers.

use thiserror::Error;

/// Errors raised by Policy Library calls; raised errors abort the
/// enclosing predicate per the sandbox contract.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The referenced path does not exist in the virtual filesystem.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// The requested filesystem view (base) was not populated for this
    /// ingest.
    #[error("base filesystem view is not available")]
    BaseViewUnavailable,

    /// A glob pattern was malformed.
    #[error("invalid glob pattern: {0}")]
    InvalidGlob(String),

    /// YAML or TOML content could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// A JSONPath query used by `jq.is_true` was malformed or resolved to
    /// a non-boolean result.
    #[error("jq query error: {0}")]
    Jq(String),

    /// Archive construction failed.
    #[error("archive error: {0}")]
    Archive(String),

    /// The sandbox HTTP helper rejected the target as an SSRF-class
    /// address (property P6).
    #[error("remote address is not public")]
    RemoteAddressNotPublic,

    /// The sandbox HTTP helper's request failed for a reason other than
    /// an SSRF rejection.
    #[error("http request failed: {0}")]
    Http(String),

    /// The requested capability was called with an unknown or
    /// unregistered name.
    #[error("unknown policy library function: {0}")]
    UnknownFunction(String),
}
