//! The crate's public-boundary error type.

use thiserror::Error;

/// Errors surfaced by the aggregator's public operations.
#[derive(Debug, Error)]
pub enum AggregatorError {
    /// The backing store rejected or failed an operation.
    #[error("store error: {0}")]
    Store(#[from] eea_core::interfaces::StoreError),

    /// The message bus rejected or failed an operation.
    #[error("bus error: {0}")]
    Bus(#[from] eea_core::interfaces::BusError),
}
