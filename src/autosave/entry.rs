//! Auto-Save Entry Module
//!
//! Entries tracked by the coordinator, plus the identity and change types
//! delivered by observed sources.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name used when a source carries no identifying attribute.
pub const UNKNOWN_SOURCE: &str = "unknown";

// == Source Kind ==
/// Kind of input surface a change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Text,
    TextArea,
    Select,
    Checkbox,
    Editable,
    Form,
}

// == Source Identity ==
/// Stable identity of an observed source.
///
/// Resolution order: explicit `id`, then `name`, then `class`, then
/// [`UNKNOWN_SOURCE`]. Blank attributes are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceIdentity {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub class: Option<String>,
}

impl SourceIdentity {
    /// Identity with an explicit identifier.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn stable_name(&self) -> &str {
        [&self.id, &self.name, &self.class]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_SOURCE)
    }
}

/// Entry id for a source observed under `source_path`.
///
/// The same logical input resolves to the same id across reloads.
pub fn entry_id(source_path: &str, identity: &SourceIdentity) -> String {
    format!("{source_path}:{}", identity.stable_name())
}

// == Source Value ==
/// Raw value of a source at the time of a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceValue {
    /// Simple field value
    Text(String),
    /// Composite source such as a form, by field name
    Fields(BTreeMap<String, String>),
}

impl SourceValue {
    /// Content compared and persisted for this value.
    ///
    /// Composite values serialize to JSON with fields in name order, so equal
    /// field sets always yield equal content.
    pub fn to_content(&self) -> String {
        match self {
            SourceValue::Text(text) => text.clone(),
            SourceValue::Fields(fields) => {
                serde_json::to_string(fields).unwrap_or_default()
            }
        }
    }
}

impl From<&str> for SourceValue {
    fn from(text: &str) -> Self {
        SourceValue::Text(text.to_string())
    }
}

impl From<String> for SourceValue {
    fn from(text: String) -> Self {
        SourceValue::Text(text)
    }
}

// == Source Change ==
/// A change notification from an observed source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceChange {
    pub identity: SourceIdentity,
    pub kind: SourceKind,
    pub value: SourceValue,
}

// == Entry Metadata ==
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub kind: SourceKind,
    pub name: String,
    /// Set when the process terminated while this entry was the most recently
    /// edited one and the session had not completed
    #[serde(default)]
    pub abandoned: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

// == Auto-Save Entry ==
/// Latest content captured for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoSaveEntry {
    pub id: String,
    pub content: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub source_path: String,
    pub metadata: EntryMetadata,
}

impl AutoSaveEntry {
    /// Builds the entry for a change observed under `source_path`.
    pub fn from_change(change: &SourceChange, source_path: &str) -> Self {
        Self {
            id: entry_id(source_path, &change.identity),
            content: change.value.to_content(),
            timestamp: Utc::now(),
            source_path: source_path.to_string(),
            metadata: EntryMetadata {
                kind: change.kind,
                name: change.identity.stable_name().to_string(),
                abandoned: false,
                extra: BTreeMap::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_resolution_order() {
        let full = SourceIdentity {
            id: Some("email".to_string()),
            name: Some("user_email".to_string()),
            class: Some("input".to_string()),
        };
        assert_eq!(full.stable_name(), "email");

        let named = SourceIdentity {
            id: Some("  ".to_string()),
            name: Some("user_email".to_string()),
            class: None,
        };
        assert_eq!(named.stable_name(), "user_email");

        let classed = SourceIdentity {
            class: Some("editor".to_string()),
            ..SourceIdentity::default()
        };
        assert_eq!(classed.stable_name(), "editor");

        assert_eq!(SourceIdentity::default().stable_name(), UNKNOWN_SOURCE);
    }

    #[test]
    fn test_entry_id_is_deterministic() {
        let identity = SourceIdentity::with_id("title");
        assert_eq!(entry_id("/posts/new", &identity), "/posts/new:title");
        assert_eq!(
            entry_id("/posts/new", &identity),
            entry_id("/posts/new", &identity.clone())
        );
        assert_ne!(entry_id("/a", &identity), entry_id("/b", &identity));
    }

    #[test]
    fn test_composite_content_is_order_independent() {
        let mut a = BTreeMap::new();
        a.insert("b".to_string(), "2".to_string());
        a.insert("a".to_string(), "1".to_string());
        let content = SourceValue::Fields(a).to_content();

        assert_eq!(content, r#"{"a":"1","b":"2"}"#);
        assert_eq!(SourceValue::from("plain").to_content(), "plain");
    }

    #[test]
    fn test_source_value_untagged_serde() {
        let text: SourceValue = serde_json::from_str(r#""hello""#).unwrap();
        assert_eq!(text, SourceValue::Text("hello".to_string()));

        let fields: SourceValue = serde_json::from_str(r#"{"name":"x"}"#).unwrap();
        assert!(matches!(fields, SourceValue::Fields(_)));
    }

    #[test]
    fn test_entry_from_change() {
        let change = SourceChange {
            identity: SourceIdentity::with_id("body"),
            kind: SourceKind::TextArea,
            value: SourceValue::from("draft"),
        };
        let entry = AutoSaveEntry::from_change(&change, "/compose");

        assert_eq!(entry.id, "/compose:body");
        assert_eq!(entry.content, "draft");
        assert_eq!(entry.source_path, "/compose");
        assert_eq!(entry.metadata.kind, SourceKind::TextArea);
        assert_eq!(entry.metadata.name, "body");
        assert!(!entry.metadata.abandoned);
    }

    #[test]
    fn test_entry_wire_format() {
        let change = SourceChange {
            identity: SourceIdentity::with_id("body"),
            kind: SourceKind::Form,
            value: SourceValue::from("x"),
        };
        let entry = AutoSaveEntry::from_change(&change, "/p");
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["sourcePath"], "/p");
        assert_eq!(json["metadata"]["kind"], "form");
        assert!(json["timestamp"].is_i64());
        assert!(json["metadata"].get("extra").is_none());
    }
}
