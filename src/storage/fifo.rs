//! FIFO Cache Module
//!
//! Bounded in-memory mirror of stored records, evicted in insertion order.

use std::collections::{HashMap, VecDeque};

use crate::storage::StoredRecord;

// == FIFO Cache ==
/// Insertion-ordered record cache.
///
/// Keys are stored in a VecDeque where:
/// - Front = earliest inserted
/// - Back = latest inserted
///
/// Reads do not reorder keys, and overwriting a key keeps its position.
#[derive(Debug)]
pub struct FifoCache {
    /// Cached records
    entries: HashMap<String, StoredRecord>,
    /// Order of keys by first insertion
    order: VecDeque<String>,
    /// Maximum number of records held
    capacity: usize,
}

impl FifoCache {
    // == Constructor ==
    /// Creates an empty cache holding at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    // == Get ==
    pub fn get(&self, key: &str) -> Option<&StoredRecord> {
        self.entries.get(key)
    }

    // == Insert ==
    /// Inserts or overwrites a record.
    ///
    /// Returns the key evicted to make room, if any.
    pub fn insert(&mut self, key: String, record: StoredRecord) -> Option<String> {
        if self.capacity == 0 {
            return None;
        }

        if let Some(existing) = self.entries.get_mut(&key) {
            *existing = record;
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.evict_oldest()
        } else {
            None
        };

        self.order.push_back(key.clone());
        self.entries.insert(key, record);
        evicted
    }

    // == Remove ==
    /// Removes a key, returning whether it was cached.
    pub fn remove(&mut self, key: &str) -> bool {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
            true
        } else {
            false
        }
    }

    /// Removes every key matching the predicate.
    pub fn remove_where(&mut self, mut predicate: impl FnMut(&str) -> bool) {
        self.order.retain(|k| !predicate(k));
        self.entries.retain(|k, _| !predicate(k));
    }

    // == Evict Oldest ==
    /// Removes and returns the earliest inserted key.
    fn evict_oldest(&mut self) -> Option<String> {
        let key = self.order.pop_front()?;
        self.entries.remove(&key);
        Some(key)
    }

    // == Peek Oldest ==
    /// Returns the earliest inserted key without removing it.
    pub fn peek_oldest(&self) -> Option<&String> {
        self.order.front()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}
