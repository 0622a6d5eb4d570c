//! Deterministic document fingerprints.
//!
//! A fingerprint is `"{fnv1a64:016x}:{len}"` over the canonical JSON text of
//! the document, where canonical means:
//! - object keys sorted (byte order), recursively
//! - transient keys (see [`crate::document::is_transient_key`]) omitted
//! - no insignificant whitespace
//!
//! Fingerprints are only ever compared for equality.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Write};

use crate::document::{is_transient_key, ContentDocument};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a, 64-bit.
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Short digest of a document used to detect divergence between replicas.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_canonical(text: &str) -> Self {
        Self(format!("{:016x}:{}", fnv1a_64(text.as_bytes()), text.len()))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint a whole document.
pub fn fingerprint(doc: &ContentDocument) -> Fingerprint {
    Fingerprint::from_canonical(&canonical_document(doc))
}

/// Fingerprint a single value, e.g. one section. Collaborators use this as a
/// cache key for derived copies (translations and the like).
pub fn fingerprint_value(value: &Value) -> Fingerprint {
    let mut out = String::new();
    write_canonical(value, &mut out);
    Fingerprint::from_canonical(&out)
}

/// Canonical JSON text of a document.
pub fn canonical_document(doc: &ContentDocument) -> String {
    let mut out = String::with_capacity(256);
    out.push('{');
    // ContentDocument keeps sections in a BTreeMap, already sorted
    let mut first = true;
    for (name, value) in doc.sections() {
        if !first {
            out.push(',');
        }
        first = false;
        write_string(name, &mut out);
        out.push(':');
        write_canonical(value, &mut out);
    }
    out.push('}');
    out
}

/// Canonical JSON text of a single value.
pub fn canonical_value(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            let _ = write!(out, "{n}");
        }
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().filter(|k| !is_transient_key(k)).collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
