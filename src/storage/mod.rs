//! Storage Module
//!
//! Namespaced key/value storage with TTL expiry, budgeted eviction, a FIFO
//! read cache and a reversible payload pipeline.

mod backend;
mod engine;
mod fifo;
mod record;
mod stats;
mod transform;


// Re-export public types
pub use backend::{Backend, BackendKind, FileBackend, MemoryBackend};
pub use engine::{SharedStorage, StorageEngine, StorageOptions, SESSION_EXPORT_PREFIX};
pub use fifo::FifoCache;
pub use record::StoredRecord;
pub use stats::StorageStats;
pub use transform::{Encoding, Envelope, Transformer, COMPRESSED_TAG, ENCRYPTED_TAG};
