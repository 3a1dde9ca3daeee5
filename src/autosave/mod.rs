//! Auto-Save Module
//!
//! Observes editable sources and persists their latest content through the
//! storage engine, debounced per source and batched into bulk writes.

mod coordinator;
mod entry;
mod schedule;

// Re-export public types
pub use crate::config::AutoSaveConfig;
pub use coordinator::{AutoSaveCoordinator, SourceWatch, TerminationOutcome, BATCH_WINDOW};
pub use entry::{
    entry_id, AutoSaveEntry, EntryMetadata, SourceChange, SourceIdentity, SourceKind,
    SourceValue, UNKNOWN_SOURCE,
};
pub use schedule::{Batcher, Debouncer};
