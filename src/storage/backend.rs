//! Backend Module
//!
//! The [`Backend`] trait is the flat string key/value surface the engine
//! writes records to. Implementations:
//!
//! - [`MemoryBackend`]: ephemeral, cleared with the process; optional quota
//! - [`FileBackend`]: durable, one JSON document rewritten atomically on
//!   every mutation
//!
//! Backends know nothing about namespaces or records; the engine prefixes
//! keys and serializes records before they get here.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::{StorageError, StorageResult};

// == Backend Kind ==
/// Which backend an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Survives process restarts
    Durable,
    /// Cleared at session end
    Ephemeral,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::Durable, BackendKind::Ephemeral];

    pub fn from_persistent(persistent: bool) -> Self {
        if persistent {
            BackendKind::Durable
        } else {
            BackendKind::Ephemeral
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Durable => "durable",
            BackendKind::Ephemeral => "ephemeral",
        }
    }
}

// == Backend Trait ==
/// Flat key/value storage.
pub trait Backend: Send + Sync {
    /// Returns `None` if the key does not exist.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Overwrites any existing value.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Returns `true` if the key existed.
    fn remove(&self, key: &str) -> StorageResult<bool>;

    /// All keys, in no particular order.
    fn keys(&self) -> StorageResult<Vec<String>>;
}

impl<B: Backend + ?Sized> Backend for Arc<B> {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        (**self).remove(key)
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        (**self).keys()
    }
}

fn lock_error<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Backend(format!("backend lock poisoned: {e}"))
}

// == Memory Backend ==
/// In-memory backend for ephemeral data and tests.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: RwLock<HashMap<String, String>>,
    /// Maximum total of key + value bytes, None = unbounded
    quota: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend that rejects writes past `quota` bytes, the way
    /// browser storage reports quota exhaustion.
    pub fn with_quota(quota: usize) -> Self {
        Self {
            data: RwLock::default(),
            quota: Some(quota),
        }
    }
}

impl Backend for MemoryBackend {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let data = self.data.read().map_err(lock_error)?;
        Ok(data.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut data = self.data.write().map_err(lock_error)?;

        if let Some(quota) = self.quota {
            let used: usize = data
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if used + key.len() + value.len() > quota {
                return Err(StorageError::Backend(format!(
                    "quota of {quota} bytes exceeded"
                )));
            }
        }

        data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        let mut data = self.data.write().map_err(lock_error)?;
        Ok(data.remove(key).is_some())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let data = self.data.read().map_err(lock_error)?;
        Ok(data.keys().cloned().collect())
    }
}

// == File Backend ==
/// Durable backend stored as a single JSON object on disk.
///
/// The whole document is loaded at open and rewritten after each mutation
/// through a temporary file and a rename. A failed write leaves both the
/// file and the in-memory view unchanged.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    data: RwLock<BTreeMap<String, String>>,
}

impl FileBackend {
    /// Opens (or creates) the backend file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let data = match fs::read_to_string(&path) {
            Ok(contents) if !contents.trim().is_empty() => serde_json::from_str(&contents)?,
            Ok(_) => BTreeMap::new(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(path = %path.display(), "Opened durable backend");
        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, data: &BTreeMap<String, String>) -> StorageResult<()> {
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(data)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl Backend for FileBackend {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let data = self.data.read().map_err(lock_error)?;
        Ok(data.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut data = self.data.write().map_err(lock_error)?;
        let previous = data.insert(key.to_string(), value.to_string());

        if let Err(e) = self.persist(&data) {
            match previous {
                Some(previous) => data.insert(key.to_string(), previous),
                None => data.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        let mut data = self.data.write().map_err(lock_error)?;
        let Some(previous) = data.remove(key) else {
            return Ok(false);
        };

        if let Err(e) = self.persist(&data) {
            data.insert(key.to_string(), previous);
            return Err(e);
        }
        Ok(true)
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let data = self.data.read().map_err(lock_error)?;
        Ok(data.keys().cloned().collect())
    }
}
