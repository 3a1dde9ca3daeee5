//! Auto-Save Engine - durable auto-save over a namespaced key/value store
//!
//! The storage engine provides TTL expiry, budgeted eviction, a FIFO cache
//! and optional compression/obfuscation. The auto-save coordinator debounces
//! source changes and batches them into bulk writes with path-scoped
//! recovery.

pub mod api;
pub mod autosave;
pub mod config;
pub mod error;
pub mod models;
pub mod storage;
pub mod tasks;

pub use api::AppState;
pub use autosave::{AutoSaveConfig, AutoSaveCoordinator, AutoSaveEntry};
pub use config::{Config, StorageConfig};
pub use error::{AutoSaveError, StorageError, StorageResult};
pub use storage::{SharedStorage, StorageEngine, StorageOptions};
pub use tasks::spawn_sweep_task;
