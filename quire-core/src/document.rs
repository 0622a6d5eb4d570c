//! The content document: a map of independently addressable sections.
//!
//! ```text
//! ContentDocument
//! ├── "hero"          → { "title": "...", "subtitle": "..." }
//! ├── "catalogItemsA" → [ {...}, {...} ]
//! ├── "siteConfig"    → { "locale": "en", ... }
//! └── "designTokens"  → { "primary": "#0af", "_iconCache": {...} }
//! ```
//!
//! Keys beginning with [`TRANSIENT_PREFIX`] are locally derived data (cached
//! icon references and the like). They live in the local document and the
//! local cache but never reach the remote store or a fingerprint.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Object keys with this prefix are local-only and excluded from sync.
pub const TRANSIENT_PREFIX: char = '_';

/// Whether an object key names a local-only field.
pub fn is_transient_key(key: &str) -> bool {
    key.starts_with(TRANSIENT_PREFIX)
}

/// Full structured content tree managed by the sync engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentDocument {
    sections: BTreeMap<String, Value>,
}

impl ContentDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style section insert, mostly for defaults and tests.
    pub fn with_section(mut self, name: impl Into<String>, value: Value) -> Self {
        self.sections.insert(name.into(), value);
        self
    }

    /// Parse a document from a JSON object value.
    ///
    /// Returns `None` when the value is not an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self {
                sections: map.into_iter().collect(),
            }),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Object(
            self.sections
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    pub fn section(&self, name: &str) -> Option<&Value> {
        self.sections.get(name)
    }

    pub fn sections(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.sections.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Replace a section outright. Returns the previous value.
    pub fn set_section(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.sections.insert(name.into(), value)
    }

    pub fn remove_section(&mut self, name: &str) -> Option<Value> {
        self.sections.remove(name)
    }

    /// Shallow-merge `partial` into a section.
    ///
    /// Object into object merges top-level keys, last write wins per key.
    /// Any other combination (missing section, array, scalar) replaces the
    /// section with `partial`.
    pub fn patch_section(&mut self, name: &str, partial: Value) {
        match (self.sections.get_mut(name), partial) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                for (key, value) in incoming {
                    existing.insert(key, value);
                }
            }
            (current, partial) => {
                if current.is_some() {
                    log::debug!("patch of section '{name}' is not object-into-object, replacing");
                }
                self.sections.insert(name.to_string(), partial);
            }
        }
    }

    /// Copy of the document with every transient key removed, recursively.
    ///
    /// This is the payload shape sent to the remote store.
    pub fn without_transient(&self) -> Self {
        Self {
            sections: self
                .sections
                .iter()
                .map(|(name, value)| (name.clone(), strip_transient(value)))
                .collect(),
        }
    }
}

fn strip_transient(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let stripped: Map<String, Value> = map
                .iter()
                .filter(|(key, _)| !is_transient_key(key))
                .map(|(key, v)| (key.clone(), strip_transient(v)))
                .collect();
            Value::Object(stripped)
        }
        Value::Array(items) => Value::Array(items.iter().map(strip_transient).collect()),
        other => other.clone(),
    }
}

impl FromIterator<(String, Value)> for ContentDocument {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            sections: iter.into_iter().collect(),
        }
    }
}
