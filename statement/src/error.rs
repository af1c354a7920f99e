//! Rule set error types.

use rust_decimal::Decimal;
use thiserror::Error;

/// Reasons a rule set cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleSetError {
    /// No currency codes configured.
    #[error("Valid currency code set is empty")]
    EmptyCurrencySet,

    /// A configured code is not three uppercase letters.
    #[error("Malformed currency code in rule set: {0:?}")]
    MalformedCurrencyCode(String),

    /// Price bounds are negative or inverted.
    #[error("Invalid price bounds: min {min}, max {max}")]
    InvalidPriceBounds { min: Decimal, max: Decimal },

    /// Cap bounds are inverted.
    #[error("Invalid cap bounds: min {min}, max {max}")]
    InvalidCapBounds { min: u64, max: u64 },

    /// A request would never be allowed to carry any statement.
    #[error("Maximum entries per request must be positive")]
    ZeroMaxEntries,
}

/// Result type for rule set construction.
pub type RuleSetResult<T> = Result<T, RuleSetError>;
