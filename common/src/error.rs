//! Error types for the FXQL gateway.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Where an offending statement sits in the submitted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementLocation {
    /// 1-based position of the statement in scan order.
    pub index: usize,
    /// 1-based line of the statement's first character.
    pub line: usize,
    /// 1-based character within that line.
    pub column: usize,
    /// The statement text as written.
    pub fragment: String,
}

impl StatementLocation {
    /// Create a new location.
    pub fn new(index: usize, line: usize, column: usize, fragment: impl Into<String>) -> Self {
        Self {
            index,
            line,
            column,
            fragment: fragment.into(),
        }
    }
}

impl fmt::Display for StatementLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\"{}\" at line {}, character {}",
            self.fragment, self.line, self.column
        )
    }
}

/// Coarse classification of failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Text does not follow the grammar.
    Syntax,
    /// A statement breaks a configured rule.
    Validation,
    /// Too many statements in one request.
    BatchLimit,
    /// Caller identity not accepted.
    Auth,
    /// Idempotency key reused with a different body.
    Conflict,
    /// Admission refused.
    RateLimit,
    /// Persistence delegate failure.
    Storage,
    /// Unexpected failure inside the pipeline.
    Internal,
    /// Service not accepting requests.
    Unavailable,
}

impl ErrorKind {
    /// Short label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Syntax => "syntax",
            ErrorKind::Validation => "validation",
            ErrorKind::BatchLimit => "batch_limit",
            ErrorKind::Auth => "auth",
            ErrorKind::Conflict => "conflict",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Storage => "storage",
            ErrorKind::Internal => "internal",
            ErrorKind::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for FXQL gateway operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FxqlError {
    /// A fragment of the input does not match the statement grammar.
    #[error("Invalid FXQL statement: {location}")]
    MalformedStatement {
        location: StatementLocation,
        expected: String,
    },

    /// The request itself could not be read or lacks required metadata.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The input holds no statements at all.
    #[error("No valid FXQL statements found.")]
    EmptyStatement,

    /// Currency code missing from the configured code set.
    #[error("Invalid currency code '{code}' for {field} in statement {location}")]
    InvalidCurrency {
        field: &'static str,
        code: String,
        location: StatementLocation,
    },

    /// Price not numeric or outside the configured bounds.
    #[error("Invalid {field} {value}: must be a number between {min} and {max} in statement {location}")]
    InvalidPrice {
        field: &'static str,
        value: String,
        min: Decimal,
        max: Decimal,
        location: StatementLocation,
    },

    /// Cap amount outside the configured bounds.
    #[error("Invalid capAmount {value}: must be a whole number between {min} and {max} in statement {location}")]
    InvalidCap {
        value: String,
        min: u64,
        max: u64,
        location: StatementLocation,
    },

    /// More statements than one request may carry.
    #[error("Exceeded maximum currency pairs limit. A maximum of {max} currency pairs are allowed per request, got {count}.")]
    ExceedsMaxEntries { count: usize, max: usize },

    /// Caller identity is not an accepted API key.
    #[error("Invalid API key")]
    InvalidApiKey,

    /// Idempotency key already used for a different request body.
    #[error("Idempotency key '{key}' was already used with a different request body")]
    IdempotencyConflict { key: String },

    /// Admission refused by a rate limiter.
    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited {
        limiter: String,
        limit: u64,
        retry_after_ms: u64,
    },

    /// Persistence delegate failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Unexpected pipeline failure.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Service is starting or shutting down.
    #[error("Service unavailable, retry after {retry_after_ms}ms")]
    ServiceUnavailable { retry_after_ms: u64 },
}

impl FxqlError {
    /// Coarse classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FxqlError::InvalidRequest(_)
            | FxqlError::MalformedStatement { .. }
            | FxqlError::EmptyStatement => ErrorKind::Syntax,
            FxqlError::InvalidCurrency { .. }
            | FxqlError::InvalidPrice { .. }
            | FxqlError::InvalidCap { .. } => ErrorKind::Validation,
            FxqlError::ExceedsMaxEntries { .. } => ErrorKind::BatchLimit,
            FxqlError::InvalidApiKey => ErrorKind::Auth,
            FxqlError::IdempotencyConflict { .. } => ErrorKind::Conflict,
            FxqlError::RateLimited { .. } => ErrorKind::RateLimit,
            FxqlError::Storage(_) => ErrorKind::Storage,
            FxqlError::Internal(_) => ErrorKind::Internal,
            FxqlError::ServiceUnavailable { .. } => ErrorKind::Unavailable,
        }
    }

    /// Get the error code carried in response envelopes.
    pub fn error_code(&self) -> &'static str {
        match self {
            FxqlError::InvalidRequest(_) => "FXQL_E_INVALID_REQUEST",
            FxqlError::MalformedStatement { .. } => "FXQL_E_MALFORMED_SYNTAX",
            FxqlError::EmptyStatement => "FXQL_E_EMPTY_STATEMENT",
            FxqlError::InvalidCurrency { .. } => "FXQL_E_BAD_ISO",
            FxqlError::InvalidPrice { .. } => "FXQL_E_PRICE_OUT_OF_RANGE",
            FxqlError::InvalidCap { .. } => "FXQL_E_CAP_OUT_OF_RANGE",
            FxqlError::ExceedsMaxEntries { .. } => "FXQL_E_EXCEEDS_MAX_PAIRS",
            FxqlError::InvalidApiKey => "FXQL_E_INVALID_API_KEY",
            FxqlError::IdempotencyConflict { .. } => "FXQL_E_IDEMPOTENCY_CONFLICT",
            FxqlError::RateLimited { .. } => "FXQL_E_RATE_LIMIT_EXCEEDED",
            FxqlError::Storage(_) => "FXQL_E_STORAGE_FAILED",
            FxqlError::Internal(_) => "FXQL-500",
            FxqlError::ServiceUnavailable { .. } => "FXQL_E_SERVICE_UNAVAILABLE",
        }
    }

    /// HTTP-style status code for this error.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Syntax | ErrorKind::Validation | ErrorKind::BatchLimit => 400,
            ErrorKind::Auth => 403,
            ErrorKind::Conflict => 422,
            ErrorKind::RateLimit => 429,
            ErrorKind::Storage | ErrorKind::Internal => 500,
            ErrorKind::Unavailable => 503,
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::RateLimit | ErrorKind::Storage | ErrorKind::Unavailable
        )
    }

    /// Get suggested retry delay in milliseconds.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            FxqlError::RateLimited { retry_after_ms, .. } => Some(*retry_after_ms),
            FxqlError::ServiceUnavailable { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }

    /// The offending statement, for syntax and validation errors.
    pub fn location(&self) -> Option<&StatementLocation> {
        match self {
            FxqlError::MalformedStatement { location, .. }
            | FxqlError::InvalidCurrency { location, .. }
            | FxqlError::InvalidPrice { location, .. }
            | FxqlError::InvalidCap { location, .. } => Some(location),
            _ => None,
        }
    }
}

/// Result type alias for FXQL gateway operations.
pub type Result<T> = std::result::Result<T, FxqlError>;
