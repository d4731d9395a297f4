//! Common error types for cassctl.
//!
//! This module provides shared error types that are used across multiple crates.

use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur throughout cassctl.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A quantity string could not be parsed.
    #[error("invalid quantity {input:?}: {reason}")]
    InvalidQuantity {
        /// The rejected input.
        input: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A quantity does not fit into a signed 64-bit canonical value.
    #[error("quantity {0:?} is out of range")]
    QuantityOverflow(String),

    /// A resource name is empty or contains forbidden characters.
    #[error("invalid resource name: {0:?}")]
    InvalidResourceName(String),
}
