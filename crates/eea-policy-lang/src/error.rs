//! Error types for lexing, parsing, and evaluating predicate programs.

use thiserror::Error;

/// The maximum nesting depth the parser will descend for parenthesized or
/// bracketed sub-expressions, bounding stack growth on adversarial input.
pub const MAX_DSL_NESTING: usize = 32;

/// Errors raised while lexing or parsing predicate source text.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DslError {
    /// The source text exceeded the maximum permitted length.
    #[error("predicate source exceeds {max} bytes (got {len})")]
    InputTooLarge {
        /// The offending length.
        len: usize,
        /// The permitted maximum.
        max: usize,
    },

    /// An unrecognized character was encountered.
    #[error("unexpected character {char:?} at offset {offset}")]
    UnexpectedChar {
        /// The offending character.
        char: char,
        /// Byte offset of the character.
        offset: usize,
    },

    /// A string literal was not closed before end of input.
    #[error("unterminated string literal starting at offset {offset}")]
    UnterminatedString {
        /// Byte offset at which the string began.
        offset: usize,
    },

    /// The parser encountered a token it did not expect.
    #[error("unexpected token {found} at offset {offset}, expected {expected}")]
    UnexpectedToken {
        /// Description of what was found.
        found: String,
        /// Description of what was expected.
        expected: String,
        /// Byte offset of the offending token.
        offset: usize,
    },

    /// Nesting depth exceeded [`MAX_DSL_NESTING`].
    #[error("expression nesting exceeds {max} levels")]
    NestingTooDeep {
        /// The permitted maximum.
        max: usize,
    },

    /// Parsing reached end of input unexpectedly.
    #[error("unexpected end of predicate source")]
    UnexpectedEof,
}

/// Errors raised while evaluating a parsed predicate program.
#[derive(Debug, Error)]
pub enum EvalError {
    /// A predicate referenced an unregistered function namespace.
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// A data-source or policy-library call rejected its arguments.
    #[error("invalid arguments to {function}: {reason}")]
    InvalidArgs {
        /// The function name.
        function: String,
        /// Human-readable description of the rejection.
        reason: String,
    },

    /// A data-source or policy-library call raised an error during
    /// execution; this aborts the predicate per the sandbox contract.
    #[error("call to {function} failed: {reason}")]
    CallFailed {
        /// The function name.
        function: String,
        /// Human-readable description of the failure.
        reason: String,
    },

    /// The `deny_by_default` flavour's `allow` value was absent.
    #[error("predicate does not define `allow`")]
    AllowUndefined,

    /// A path expression indexed into a value that does not support
    /// indexing, or referenced a field that is not an object.
    #[error("cannot evaluate path: {0}")]
    InvalidPath(String),

    /// Evaluation exceeded its configured wall-clock budget.
    #[error("predicate evaluation timed out")]
    Timeout,
}
