//! Storage Engine Module
//!
//! Namespaced key/value store over a durable and an ephemeral backend, with
//! an in-memory FIFO cache, a reversible payload pipeline, TTL expiry and
//! budgeted cleanup.
//!
//! The public surface is fail-soft: backend and payload failures are logged
//! and turned into `false` / `None`. Only [`StorageEngine::import_data`]
//! reports errors to its caller.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::error::StorageResult;
use crate::storage::{
    Backend, BackendKind, FifoCache, FileBackend, MemoryBackend, StorageStats, StoredRecord,
    Transformer,
};

/// Export key marker routing an entry to the ephemeral backend.
pub const SESSION_EXPORT_PREFIX: &str = "session:";

/// Share of the byte budget budgeted cleanup frees per backend.
const CLEANUP_FRACTION: usize = 5;

/// Engine shared between the HTTP layer, the coordinator and background tasks.
pub type SharedStorage = Arc<RwLock<StorageEngine>>;

// == Storage Options ==
/// Per-call options accepted by every engine operation.
///
/// `ttl`, `compress` and `encrypt` only matter to `set`; reads detect
/// transforms from the payload itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    /// Durable backend when true, ephemeral otherwise
    pub persistent: bool,
    /// Expiry horizon
    #[serde(with = "ttl_millis")]
    pub ttl: Option<Duration>,
    /// Compress payloads above the size threshold
    pub compress: bool,
    /// Obfuscate the (possibly compressed) payload
    pub encrypt: bool,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            persistent: true,
            ttl: None,
            compress: false,
            encrypt: false,
        }
    }
}

impl StorageOptions {
    /// Options targeting the ephemeral backend.
    pub fn session() -> Self {
        Self {
            persistent: false,
            ..Self::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn compressed(mut self) -> Self {
        self.compress = true;
        self
    }

    pub fn encrypted(mut self) -> Self {
        self.encrypt = true;
        self
    }

    pub fn kind(&self) -> BackendKind {
        BackendKind::from_persistent(self.persistent)
    }
}

mod ttl_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ttl: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match ttl {
            Some(ttl) => s.serialize_some(&(ttl.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

// == Storage Engine ==
/// Namespaced storage service with injected backends.
pub struct StorageEngine {
    config: StorageConfig,
    durable: Box<dyn Backend>,
    ephemeral: Box<dyn Backend>,
    /// Records keyed by `"{backend}|{namespaced key}"`
    cache: FifoCache,
    transformer: Transformer,
    stats: StorageStats,
    last_sweep: Instant,
}

impl StorageEngine {
    // == Constructors ==
    /// Creates an engine over the given backends.
    pub fn new(
        config: StorageConfig,
        durable: Box<dyn Backend>,
        ephemeral: Box<dyn Backend>,
    ) -> Self {
        let transformer = Transformer::new(
            config.compression_threshold,
            config.obfuscation_key.as_bytes(),
        );
        Self {
            cache: FifoCache::new(config.cache_capacity),
            transformer,
            stats: StorageStats::new(),
            last_sweep: Instant::now(),
            config,
            durable,
            ephemeral,
        }
    }

    /// Creates an engine whose backends both live in memory.
    pub fn in_memory(config: StorageConfig) -> Self {
        Self::new(
            config,
            Box::new(MemoryBackend::new()),
            Box::new(MemoryBackend::new()),
        )
    }

    /// Opens an engine with a file-backed durable backend under `data_dir`.
    pub fn open(config: StorageConfig, data_dir: &Path) -> StorageResult<Self> {
        let path = data_dir.join(format!("{}.json", config.namespace));
        let durable = FileBackend::open(path)?;
        Ok(Self::new(
            config,
            Box::new(durable),
            Box::new(MemoryBackend::new()),
        ))
    }

    /// Wraps the engine for sharing.
    pub fn into_shared(self) -> SharedStorage {
        Arc::new(RwLock::new(self))
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    // == Key Helpers ==
    fn prefix(&self) -> String {
        format!("{}:", self.config.namespace)
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.config.namespace, key)
    }

    fn cache_key(kind: BackendKind, full_key: &str) -> String {
        format!("{}|{}", kind.as_str(), full_key)
    }

    fn backend(&self, kind: BackendKind) -> &dyn Backend {
        match kind {
            BackendKind::Durable => self.durable.as_ref(),
            BackendKind::Ephemeral => self.ephemeral.as_ref(),
        }
    }

    /// Namespaced keys held by one backend.
    fn namespace_keys(&self, kind: BackendKind) -> StorageResult<Vec<String>> {
        let prefix = self.prefix();
        Ok(self
            .backend(kind)
            .keys()?
            .into_iter()
            .filter(|k| k.starts_with(&prefix))
            .collect())
    }

    fn cache_insert(&mut self, cache_key: String, record: StoredRecord) {
        if self.cache.insert(cache_key, record).is_some() {
            self.stats.record_eviction();
        }
    }

    /// Drops a key from the cache and the backend, logging failures.
    fn purge(&mut self, kind: BackendKind, full_key: &str) {
        self.cache.remove(&Self::cache_key(kind, full_key));
        if let Err(e) = self.backend(kind).remove(full_key) {
            warn!(key = %full_key, backend = kind.as_str(), error = %e, "Failed to purge key");
        }
    }

    // == Set ==
    /// Stores `value` under `key`.
    ///
    /// Returns `false` on any failure; prior state is left unchanged.
    pub fn set(&mut self, key: &str, value: &Value, options: &StorageOptions) -> bool {
        match self.try_set(key, value, options) {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %key, backend = options.kind().as_str(), error = %e, "Failed to store key");
                false
            }
        }
    }

    fn try_set(&mut self, key: &str, value: &Value, options: &StorageOptions) -> StorageResult<()> {
        self.maybe_sweep();

        let wire = self
            .transformer
            .encode(value, options.compress, options.encrypt)?;
        let record = StoredRecord::new(key, wire, options.ttl);
        let serialized = serde_json::to_string(&record)?;

        let kind = options.kind();
        let full_key = self.full_key(key);
        let incoming = full_key.len() + serialized.len();
        // An overwrite replaces the record it measures against
        let replaced = match self.backend(kind).get(&full_key) {
            Ok(Some(raw)) => full_key.len() + raw.len(),
            _ => 0,
        };
        let projected = self.get_storage_size().saturating_sub(replaced) + incoming;
        if projected > self.config.max_storage_bytes {
            self.budgeted_cleanup();
        }

        self.backend(kind).set(&full_key, &serialized)?;
        self.cache_insert(Self::cache_key(kind, &full_key), record);
        Ok(())
    }

    /// Serializes `value` and stores it.
    pub fn set_json<T: Serialize>(&mut self, key: &str, value: &T, options: &StorageOptions) -> bool {
        match serde_json::to_value(value) {
            Ok(value) => self.set(key, &value, options),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize value");
                false
            }
        }
    }

    // == Get ==
    /// Reads the value stored under `key`.
    ///
    /// Expired records are purged from cache and backend and read as `None`.
    /// A payload that cannot be decoded comes back as its raw string.
    pub fn get(&mut self, key: &str, options: &StorageOptions) -> Option<Value> {
        let record = self.load_record(key, options.kind())?;
        Some(self.transformer.decode_or_raw(&record.value))
    }

    /// Reads and deserializes the value stored under `key`.
    pub fn get_json<T: DeserializeOwned>(&mut self, key: &str, options: &StorageOptions) -> Option<T> {
        let value = self.get(key, options)?;
        match serde_json::from_value(value) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "Stored value has an unexpected shape");
                None
            }
        }
    }

    fn load_record(&mut self, key: &str, kind: BackendKind) -> Option<StoredRecord> {
        let full_key = self.full_key(key);
        let cache_key = Self::cache_key(kind, &full_key);

        if let Some(record) = self.cache.get(&cache_key) {
            if record.is_expired() {
                self.purge(kind, &full_key);
                self.stats.record_expirations(1);
                return None;
            }
            let record = record.clone();
            self.stats.record_hit();
            return Some(record);
        }

        self.stats.record_miss();
        let raw = match self.backend(kind).get(&full_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, backend = kind.as_str(), error = %e, "Failed to read key");
                return None;
            }
        };

        let record: StoredRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(key = %key, error = %e, "Corrupt record, purging");
                self.purge(kind, &full_key);
                return None;
            }
        };

        if record.is_expired() {
            self.purge(kind, &full_key);
            self.stats.record_expirations(1);
            return None;
        }

        self.cache_insert(cache_key, record.clone());
        Some(record)
    }

    // == Has ==
    /// Checks the cache first, then the backend record.
    ///
    /// Expired and corrupt records are purged and read as absent, as `get` does.
    pub fn has(&mut self, key: &str, options: &StorageOptions) -> bool {
        let kind = options.kind();
        let full_key = self.full_key(key);

        if let Some(record) = self.cache.get(&Self::cache_key(kind, &full_key)) {
            if !record.is_expired() {
                return true;
            }
            self.purge(kind, &full_key);
            self.stats.record_expirations(1);
            return false;
        }

        let raw = match self.backend(kind).get(&full_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return false,
            Err(e) => {
                warn!(key = %key, backend = kind.as_str(), error = %e, "Failed to look up key");
                return false;
            }
        };

        match serde_json::from_str::<StoredRecord>(&raw) {
            Ok(record) if record.is_expired() => {
                self.purge(kind, &full_key);
                self.stats.record_expirations(1);
                false
            }
            Ok(_) => true,
            Err(e) => {
                warn!(key = %key, error = %e, "Corrupt record, purging");
                self.purge(kind, &full_key);
                false
            }
        }
    }

    // == Remove ==
    pub fn remove(&mut self, key: &str, options: &StorageOptions) -> bool {
        let kind = options.kind();
        let full_key = self.full_key(key);
        self.cache.remove(&Self::cache_key(kind, &full_key));

        match self.backend(kind).remove(&full_key) {
            Ok(_) => true,
            Err(e) => {
                warn!(key = %key, backend = kind.as_str(), error = %e, "Failed to remove key");
                false
            }
        }
    }

    // == Keys ==
    /// Keys of the selected backend, without the namespace prefix.
    pub fn keys(&self, options: &StorageOptions) -> Vec<String> {
        let prefix = self.prefix();
        match self.namespace_keys(options.kind()) {
            Ok(keys) => {
                let mut keys: Vec<String> = keys
                    .into_iter()
                    .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
                    .collect();
                keys.sort();
                keys
            }
            Err(e) => {
                warn!(backend = options.kind().as_str(), error = %e, "Failed to list keys");
                Vec::new()
            }
        }
    }

    // == Clear ==
    /// Removes every namespaced key from the selected backend.
    pub fn clear(&mut self, options: &StorageOptions) -> bool {
        let kind = options.kind();
        let cache_prefix = Self::cache_key(kind, "");
        self.cache.remove_where(|k| k.starts_with(&cache_prefix));

        let keys = match self.namespace_keys(kind) {
            Ok(keys) => keys,
            Err(e) => {
                warn!(backend = kind.as_str(), error = %e, "Failed to list keys for clear");
                return false;
            }
        };

        let mut ok = true;
        for key in keys {
            if let Err(e) = self.backend(kind).remove(&key) {
                warn!(key = %key, error = %e, "Failed to clear key");
                ok = false;
            }
        }
        ok
    }

    /// Empties the in-memory cache only.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    // == Storage Size ==
    /// Sum of key and payload lengths across both backends for the namespace.
    pub fn get_storage_size(&self) -> usize {
        BackendKind::ALL
            .into_iter()
            .map(|kind| self.backend_usage(kind))
            .sum()
    }

    fn backend_usage(&self, kind: BackendKind) -> usize {
        let keys = match self.namespace_keys(kind) {
            Ok(keys) => keys,
            Err(e) => {
                warn!(backend = kind.as_str(), error = %e, "Failed to measure backend");
                return 0;
            }
        };
        keys.iter()
            .map(|key| match self.backend(kind).get(key) {
                Ok(Some(raw)) => key.len() + raw.len(),
                _ => 0,
            })
            .sum()
    }

    // == Budgeted Cleanup ==
    /// Removes the oldest records of each backend until a fifth of the budget
    /// has been freed there. Unreadable records go first.
    ///
    /// Returns the number of records removed.
    pub fn budgeted_cleanup(&mut self) -> usize {
        let target = self.config.max_storage_bytes / CLEANUP_FRACTION;
        let mut removed = 0;

        for kind in BackendKind::ALL {
            let keys = match self.namespace_keys(kind) {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(backend = kind.as_str(), error = %e, "Cleanup could not list keys");
                    continue;
                }
            };

            let mut candidates: Vec<(DateTime<Utc>, String, usize)> = keys
                .into_iter()
                .filter_map(|key| {
                    let raw = self.backend(kind).get(&key).ok()??;
                    let timestamp = serde_json::from_str::<StoredRecord>(&raw)
                        .map(|record| record.timestamp)
                        .unwrap_or(DateTime::<Utc>::MIN_UTC);
                    let size = key.len() + raw.len();
                    Some((timestamp, key, size))
                })
                .collect();
            candidates.sort();

            let mut freed = 0;
            for (_, key, size) in candidates {
                if freed >= target {
                    break;
                }
                match self.backend(kind).remove(&key) {
                    Ok(_) => {
                        self.cache.remove(&Self::cache_key(kind, &key));
                        freed += size;
                        removed += 1;
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "Cleanup failed to remove key");
                    }
                }
            }
            debug!(backend = kind.as_str(), freed, "Budgeted cleanup pass finished");
        }

        self.stats.record_reclaimed(removed);
        info!(removed, "Storage budget exceeded, removed oldest records");
        removed
    }

    // == Expiry Sweep ==
    /// Runs [`sweep_expired`](Self::sweep_expired) if the sweep interval has
    /// elapsed since the last sweep.
    pub fn maybe_sweep(&mut self) -> usize {
        if self.last_sweep.elapsed() < self.config.sweep_interval {
            return 0;
        }
        self.sweep_expired()
    }

    /// Removes every record whose TTL has elapsed, in both backends.
    pub fn sweep_expired(&mut self) -> usize {
        self.last_sweep = Instant::now();
        let now = Utc::now();
        let mut removed = 0;

        for kind in BackendKind::ALL {
            let keys = match self.namespace_keys(kind) {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(backend = kind.as_str(), error = %e, "Sweep could not list keys");
                    continue;
                }
            };

            for key in keys {
                let expired = matches!(
                    self.backend(kind).get(&key),
                    Ok(Some(raw)) if serde_json::from_str::<StoredRecord>(&raw)
                        .is_ok_and(|record| record.is_expired_at(now))
                );
                if expired {
                    self.purge(kind, &key);
                    removed += 1;
                }
            }
        }

        self.stats.record_expirations(removed);
        removed
    }

    // == Export / Import ==
    /// Dumps every namespaced record of both backends.
    ///
    /// Keys lose the namespace prefix; ephemeral keys gain `session:` so
    /// [`import_data`](Self::import_data) can route them back.
    pub fn export_data(&self) -> BTreeMap<String, Value> {
        let prefix = self.prefix();
        let mut data = BTreeMap::new();

        for kind in BackendKind::ALL {
            let keys = match self.namespace_keys(kind) {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(backend = kind.as_str(), error = %e, "Export could not list keys");
                    continue;
                }
            };

            for full_key in keys {
                let Ok(Some(raw)) = self.backend(kind).get(&full_key) else {
                    continue;
                };
                let key = full_key.strip_prefix(&prefix).unwrap_or(&full_key);
                let export_key = match kind {
                    BackendKind::Durable => key.to_string(),
                    BackendKind::Ephemeral => format!("{SESSION_EXPORT_PREFIX}{key}"),
                };
                let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
                data.insert(export_key, value);
            }
        }

        data
    }

    /// Restores records produced by [`export_data`](Self::export_data).
    ///
    /// Every record is validated before anything is written, so a malformed
    /// dump is rejected as a whole. Returns the number of records written.
    pub fn import_data(&mut self, data: BTreeMap<String, Value>) -> StorageResult<usize> {
        let mut staged = Vec::with_capacity(data.len());
        for (key, value) in data {
            let record: StoredRecord = serde_json::from_value(value)?;
            let (kind, key) = match key.strip_prefix(SESSION_EXPORT_PREFIX) {
                Some(key) => (BackendKind::Ephemeral, key.to_string()),
                None => (BackendKind::Durable, key),
            };
            staged.push((kind, self.full_key(&key), serde_json::to_string(&record)?));
        }

        let count = staged.len();
        for (kind, full_key, serialized) in staged {
            self.cache.remove(&Self::cache_key(kind, &full_key));
            self.backend(kind).set(&full_key, &serialized)?;
        }

        info!(count, "Imported records");
        Ok(count)
    }

    // == Stats ==
    pub fn stats(&self) -> StorageStats {
        let mut stats = self.stats.clone();
        stats.cache_entries = self.cache.len();
        stats
    }

    /// Number of records currently mirrored in memory.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}
