//! Storage Statistics Module
//!
//! Tracks cache hits, misses and the different removal paths of the engine.

use serde::Serialize;

// == Storage Stats ==
/// Storage engine counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StorageStats {
    /// Reads served from the in-memory cache
    pub hits: u64,
    /// Reads that had to go to a backend
    pub misses: u64,
    /// Cache entries dropped by the FIFO bound
    pub evictions: u64,
    /// Records purged because their TTL elapsed
    pub expirations: u64,
    /// Records removed by budgeted cleanup
    pub reclaimed: u64,
    /// Current number of cached records
    pub cache_entries: usize,
}

impl StorageStats {
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no reads have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    pub fn record_expirations(&mut self, count: usize) {
        self.expirations += count as u64;
    }

    pub fn record_reclaimed(&mut self, count: usize) {
        self.reclaimed += count as u64;
    }
}
