//! Configuration Module
//!
//! Handles loading the process configuration from environment variables and
//! deriving the storage engine and auto-save coordinator settings from it.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::storage::StorageOptions;

// == Defaults ==
/// Total byte budget for one namespace across both backends (10 MiB).
pub const DEFAULT_MAX_STORAGE_BYTES: usize = 10 * 1024 * 1024;

/// Serialized size above which a `compress` request actually compresses.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 1024;

/// Capacity of the in-memory record cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Minimum spacing between two expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Process configuration.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Prefix applied to every backend key
    pub namespace: String,
    /// Directory holding the durable backend files
    pub data_dir: PathBuf,
    /// Byte budget that triggers budgeted cleanup
    pub max_storage_bytes: usize,
    /// Maximum number of records mirrored in memory
    pub cache_capacity: usize,
    /// Expiry sweep interval in seconds
    pub sweep_interval: u64,
    /// Quiet period before a source change is processed, in milliseconds
    pub debounce_ms: u64,
    /// Maximum number of auto-save entries kept
    pub max_entries: usize,
    /// Storage key of the auto-save bulk record
    pub storage_key: String,
    /// Whether persisted entries are reloaded and offered for recovery
    pub enable_recovery: bool,
    /// Path the coordinator scopes new entries and recovery to
    pub current_path: String,
    /// HTTP server port
    pub server_port: u16,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `STORAGE_NAMESPACE` - Key prefix (default: autosave)
    /// - `DATA_DIR` - Durable backend directory (default: ./data)
    /// - `MAX_STORAGE_BYTES` - Namespace byte budget (default: 10 MiB)
    /// - `CACHE_CAPACITY` - In-memory cache entries (default: 100)
    /// - `SWEEP_INTERVAL` - Expiry sweep interval in seconds (default: 300)
    /// - `AUTOSAVE_DEBOUNCE_MS` - Debounce window (default: 2000)
    /// - `AUTOSAVE_MAX_ENTRIES` - Auto-save entry cap (default: 50)
    /// - `AUTOSAVE_STORAGE_KEY` - Bulk record key (default: autosave_entries)
    /// - `AUTOSAVE_RECOVERY` - Enable recovery (default: true)
    /// - `AUTOSAVE_PATH` - Current path (default: /)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            namespace: env::var("STORAGE_NAMESPACE").unwrap_or(defaults.namespace),
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            max_storage_bytes: parse_env("MAX_STORAGE_BYTES", defaults.max_storage_bytes),
            cache_capacity: parse_env("CACHE_CAPACITY", defaults.cache_capacity),
            sweep_interval: parse_env("SWEEP_INTERVAL", defaults.sweep_interval),
            debounce_ms: parse_env("AUTOSAVE_DEBOUNCE_MS", defaults.debounce_ms),
            max_entries: parse_env("AUTOSAVE_MAX_ENTRIES", defaults.max_entries),
            storage_key: env::var("AUTOSAVE_STORAGE_KEY").unwrap_or(defaults.storage_key),
            enable_recovery: parse_env("AUTOSAVE_RECOVERY", defaults.enable_recovery),
            current_path: env::var("AUTOSAVE_PATH").unwrap_or(defaults.current_path),
            server_port: parse_env("SERVER_PORT", defaults.server_port),
        }
    }

    /// Storage engine settings derived from this configuration.
    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            namespace: self.namespace.clone(),
            max_storage_bytes: self.max_storage_bytes,
            cache_capacity: self.cache_capacity,
            sweep_interval: Duration::from_secs(self.sweep_interval),
            ..StorageConfig::default()
        }
    }

    /// Auto-save coordinator settings derived from this configuration.
    pub fn autosave_config(&self) -> AutoSaveConfig {
        AutoSaveConfig {
            debounce: Duration::from_millis(self.debounce_ms),
            max_entries: self.max_entries,
            storage_key: self.storage_key.clone(),
            enable_recovery: self.enable_recovery,
            storage_options: StorageOptions::default().compressed(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: "autosave".to_string(),
            data_dir: PathBuf::from("./data"),
            max_storage_bytes: DEFAULT_MAX_STORAGE_BYTES,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            sweep_interval: DEFAULT_SWEEP_INTERVAL.as_secs(),
            debounce_ms: 2000,
            max_entries: 50,
            storage_key: "autosave_entries".to_string(),
            enable_recovery: true,
            current_path: "/".to_string(),
            server_port: 3000,
        }
    }
}

fn parse_env<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// == Storage Config ==
/// Settings for a [`StorageEngine`](crate::storage::StorageEngine).
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Prefix applied to every key, keeps logical stores from colliding
    pub namespace: String,
    /// Byte budget for the namespace across both backends
    pub max_storage_bytes: usize,
    /// Serialized size above which compression kicks in
    pub compression_threshold: usize,
    /// In-memory cache capacity (FIFO)
    pub cache_capacity: usize,
    /// Minimum time between two expiry sweeps
    pub sweep_interval: Duration,
    /// Key for the reversible obfuscation transform
    pub obfuscation_key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            namespace: "autosave".to_string(),
            max_storage_bytes: DEFAULT_MAX_STORAGE_BYTES,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            obfuscation_key: "autosave-engine".to_string(),
        }
    }
}

// == Auto-Save Config ==
/// Settings for an [`AutoSaveCoordinator`](crate::autosave::AutoSaveCoordinator).
///
/// Supplied once at construction; the coordinator never mutates it.
#[derive(Debug, Clone)]
pub struct AutoSaveConfig {
    /// Quiet period that must follow the last change of a source
    pub debounce: Duration,
    /// Most-recent entries kept, older ones are evicted on flush
    pub max_entries: usize,
    /// Storage key of the bulk record
    pub storage_key: String,
    /// Reload persisted entries on init and answer recovery queries
    pub enable_recovery: bool,
    /// Options used for every bulk write
    pub storage_options: StorageOptions,
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Config::default().autosave_config()
    }
}
