//! Request DTOs for the auto-save engine API
//!
//! Defines the structure of incoming HTTP request bodies and query strings.

use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use crate::autosave::{AutoSaveEntry, EntryMetadata, SourceKind};
use crate::storage::StorageOptions;

/// Longest key accepted over HTTP.
pub const MAX_KEY_LEN: usize = 256;

/// Returns an error message if `key` cannot be stored.
pub fn validate_key(key: &str) -> Option<String> {
    if key.is_empty() {
        return Some("Key cannot be empty".to_string());
    }
    if key.len() > MAX_KEY_LEN {
        return Some(format!(
            "Key exceeds maximum length of {MAX_KEY_LEN} characters"
        ));
    }
    None
}

/// Request body for `PUT /storage/:key`
#[derive(Debug, Clone, Deserialize)]
pub struct SetValueRequest {
    /// Any JSON value
    pub value: Value,
    /// Optional TTL in milliseconds
    #[serde(default)]
    pub ttl_ms: Option<u64>,
    /// Durable backend unless explicitly false
    #[serde(default)]
    pub persistent: Option<bool>,
    #[serde(default)]
    pub compress: bool,
    #[serde(default)]
    pub encrypt: bool,
}

impl SetValueRequest {
    pub fn options(&self) -> StorageOptions {
        StorageOptions {
            persistent: self.persistent.unwrap_or(true),
            ttl: self.ttl_ms.map(Duration::from_millis),
            compress: self.compress,
            encrypt: self.encrypt,
        }
    }
}

/// Query string selecting a backend: `?persistent=false`
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct BackendQuery {
    #[serde(default)]
    pub persistent: Option<bool>,
}

impl BackendQuery {
    pub fn options(&self) -> StorageOptions {
        StorageOptions {
            persistent: self.persistent.unwrap_or(true),
            ..StorageOptions::default()
        }
    }
}

/// Request body for `POST /autosave/entries`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveEntryRequest {
    pub id: String,
    pub content: String,
    pub source_path: String,
    #[serde(default = "default_kind")]
    pub kind: SourceKind,
    /// Display name, defaults to the id
    #[serde(default)]
    pub name: Option<String>,
}

fn default_kind() -> SourceKind {
    SourceKind::Text
}

impl SaveEntryRequest {
    pub fn validate(&self) -> Option<String> {
        if self.id.trim().is_empty() {
            return Some("Entry id cannot be empty".to_string());
        }
        None
    }

    /// Builds the entry, stamped with the current time.
    pub fn into_entry(self) -> AutoSaveEntry {
        AutoSaveEntry {
            metadata: EntryMetadata {
                kind: self.kind,
                name: self.name.unwrap_or_else(|| self.id.clone()),
                abandoned: false,
                extra: Default::default(),
            },
            id: self.id,
            content: self.content,
            timestamp: Utc::now(),
            source_path: self.source_path,
        }
    }
}

/// Request body for `PUT /autosave/path`
#[derive(Debug, Clone, Deserialize)]
pub struct SetPathRequest {
    pub path: String,
}
