//! Persistence delegate interface.

use async_trait::async_trait;

use fxql_common::{ParsedEntry, PersistedEntry, Result};

/// Accepts validated batches for durable storage.
///
/// Implementations must make a batch visible all together or not at all.
/// Failures are reported as [`fxql_common::FxqlError::Storage`].
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Persist a batch, returning the entries with their assigned IDs.
    async fn accept(&self, entries: Vec<ParsedEntry>) -> Result<Vec<PersistedEntry>>;
}
