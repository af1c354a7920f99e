//! FXQL Entry Store
//!
//! Persistence delegate receiving validated batches from the gateway.

pub mod entry_store;
pub mod memory;

pub use entry_store::EntryStore;
pub use memory::MemoryEntryStore;
