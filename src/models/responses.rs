//! Response DTOs for the auto-save engine API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;
use serde_json::Value;

use crate::autosave::{AutoSaveEntry, TerminationOutcome};
use crate::storage::StorageStats;

/// Response body for `GET /storage/:key`
#[derive(Debug, Clone, Serialize)]
pub struct ValueResponse {
    pub key: String,
    pub value: Value,
}

impl ValueResponse {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Response body for `PUT /storage/:key`
#[derive(Debug, Clone, Serialize)]
pub struct SetResponse {
    /// Success message
    pub message: String,
    /// The key that was set
    pub key: String,
}

impl SetResponse {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' set successfully", key),
            key,
        }
    }
}

/// Response body for `DELETE /storage/:key`
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    /// Success message
    pub message: String,
    /// The key that was deleted
    pub key: String,
}

impl DeleteResponse {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' deleted successfully", key),
            key,
        }
    }
}

/// Response body for `GET /storage`
#[derive(Debug, Clone, Serialize)]
pub struct KeysResponse {
    pub count: usize,
    pub keys: Vec<String>,
}

impl From<Vec<String>> for KeysResponse {
    fn from(keys: Vec<String>) -> Self {
        Self {
            count: keys.len(),
            keys,
        }
    }
}

/// Response body for `POST /storage/import`
#[derive(Debug, Clone, Serialize)]
pub struct ImportResponse {
    pub imported: usize,
}

/// Response body for `GET /stats`
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Reads served from the cache
    pub hits: u64,
    /// Reads served by a backend
    pub misses: u64,
    /// FIFO cache evictions
    pub evictions: u64,
    /// Records purged after their TTL elapsed
    pub expirations: u64,
    /// Records removed by budgeted cleanup
    pub reclaimed: u64,
    /// Records mirrored in the cache
    pub cache_entries: usize,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
    /// Namespace bytes across both backends
    pub storage_bytes: usize,
}

impl StatsResponse {
    pub fn new(stats: &StorageStats, storage_bytes: usize) -> Self {
        Self {
            hits: stats.hits,
            misses: stats.misses,
            evictions: stats.evictions,
            expirations: stats.expirations,
            reclaimed: stats.reclaimed,
            cache_entries: stats.cache_entries,
            hit_rate: stats.hit_rate(),
            storage_bytes,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// List of auto-save entries, most recent first.
#[derive(Debug, Clone, Serialize)]
pub struct EntriesResponse {
    pub count: usize,
    pub entries: Vec<AutoSaveEntry>,
}

impl From<Vec<AutoSaveEntry>> for EntriesResponse {
    fn from(entries: Vec<AutoSaveEntry>) -> Self {
        Self {
            count: entries.len(),
            entries,
        }
    }
}

/// Response body for `POST /autosave/entries`
#[derive(Debug, Clone, Serialize)]
pub struct SaveEntryResponse {
    pub id: String,
    /// False when the content matched what was already recorded
    pub queued: bool,
}

/// Response body for `POST /autosave/flush`
#[derive(Debug, Clone, Serialize)]
pub struct FlushResponse {
    pub flushed: bool,
}

/// Serialized [`TerminationOutcome`].
#[derive(Debug, Clone, Serialize)]
pub struct TerminationResponse {
    pub needs_confirmation: bool,
    pub flushed: bool,
    pub abandoned: Option<String>,
}

impl From<TerminationOutcome> for TerminationResponse {
    fn from(outcome: TerminationOutcome) -> Self {
        Self {
            needs_confirmation: outcome.needs_confirmation,
            flushed: outcome.flushed,
            abandoned: outcome.abandoned,
        }
    }
}

/// Error response body
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
