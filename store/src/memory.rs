//! In-memory entry store.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{info, instrument, warn};

use fxql_common::{now, EntryId, FxqlError, ParsedEntry, PersistedEntry, Result};

use crate::entry_store::EntryStore;

/// Entry store holding everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryEntryStore {
    entries: RwLock<Vec<PersistedEntry>>,
    batches: AtomicU64,
    unavailable: AtomicBool,
}

impl MemoryEntryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of batches accepted so far.
    pub fn batch_count(&self) -> u64 {
        self.batches.load(Ordering::SeqCst)
    }

    /// Number of entries stored.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Snapshot of all stored entries in insertion order.
    pub fn entries(&self) -> Vec<PersistedEntry> {
        self.entries.read().clone()
    }

    /// Look up one entry by ID.
    pub fn get(&self, id: &EntryId) -> Option<PersistedEntry> {
        self.entries.read().iter().find(|e| &e.entry_id == id).cloned()
    }

    /// Make every subsequent write fail until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl EntryStore for MemoryEntryStore {
    #[instrument(skip(self, entries), fields(count = entries.len()))]
    async fn accept(&self, entries: Vec<ParsedEntry>) -> Result<Vec<PersistedEntry>> {
        if self.unavailable.load(Ordering::SeqCst) {
            warn!("Entry store unavailable, rejecting batch");
            return Err(FxqlError::Storage("entry store unavailable".to_string()));
        }

        let created_at = now();
        let persisted: Vec<PersistedEntry> = entries
            .into_iter()
            .map(|entry| PersistedEntry::new(entry, created_at))
            .collect();

        // One write lock per batch: readers see all of it or none.
        self.entries.write().extend(persisted.iter().cloned());
        let batch = self.batches.fetch_add(1, Ordering::SeqCst) + 1;

        info!(batch, entries = persisted.len(), "Batch persisted");
        Ok(persisted)
    }
}
