//! Newtype identifiers used throughout the aggregator and evaluation pipeline.
//!
//! Every identifier is a thin wrapper around a primitive so that entity,
//! project, profile, and rule-type identifiers cannot be interchanged by
//! accident at a call site.

use std::fmt;
use std::num::NonZeroU64;

use serde::Deserialize;
use serde::Serialize;

macro_rules! opaque_string_id {
    ($name:ident) => {
        #[doc = concat!("Opaque string identifier: ", stringify!($name), ".")]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Builds an identifier from an owned string, rejecting empty values.
            #[must_use]
            pub fn new(raw: impl Into<String>) -> Option<Self> {
                let raw = raw.into();
                if raw.is_empty() { None } else { Some(Self(raw)) }
            }

            /// Returns the identifier's string representation.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

macro_rules! numeric_id {
    ($name:ident) => {
        #[doc = concat!("Numeric identifier: ", stringify!($name), ".")]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(NonZeroU64);

        impl $name {
            /// Builds an identifier from a raw, non-zero value.
            #[must_use]
            pub const fn from_raw(raw: NonZeroU64) -> Self {
                Self(raw)
            }

            /// Builds an identifier from a `u64`, returning `None` for zero.
            #[must_use]
            pub fn new(raw: u64) -> Option<Self> {
                NonZeroU64::new(raw).map(Self)
            }

            /// Returns the underlying numeric value.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0.get()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

opaque_string_id!(EntityId);
opaque_string_id!(FlusherKey);
opaque_string_id!(ProviderId);

numeric_id!(ProjectId);
numeric_id!(ProfileId);
numeric_id!(RuleTypeId);

/// Execution-correlation identifier assigned when an evaluation lock is
/// acquired. Doubles as the evaluation's `locked_by` value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Wraps an already-generated correlation token.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the correlation token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Monotonic sequence number carried by an upstream event, used for causal
/// reconstruction by downstream consumers (never for in-core ordering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    /// Wraps a raw sequence number.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw sequence number.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}
