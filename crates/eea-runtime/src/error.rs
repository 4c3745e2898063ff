//! Errors surfaced by the wiring layer itself, as distinct from the
//! per-collaborator errors ([`eea_core::interfaces::StoreError`],
//! [`eea_core::interfaces::BusError`]) that `Runtime`'s methods wrap.

use eea_aggregator::AggregatorError;
use eea_config::ConfigError;
use eea_core::interfaces::BusError;
use eea_core::interfaces::StoreError;

/// Failure building or operating a [`crate::Runtime`].
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Configuration failed to load or validate.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// The persistent store could not be opened or queried.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// The message bus rejected a subscription or publish.
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
    /// The aggregator's admission gate or flush scheduler failed.
    #[error("aggregator error: {0}")]
    Aggregator(#[from] AggregatorError),
}
