//! FXQL Content Hashing
//!
//! Hashes request bodies for idempotency records and audit events.

pub mod hash;

pub use hash::{content_hash, sha256, sha256_hex};

/// Errors from hashing operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
