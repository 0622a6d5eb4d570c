//! Server-recorded history: saved versions and audit entries.
//!
//! Both are immutable and append-only on the remote side. Timestamps are
//! milliseconds since the Unix epoch.

use serde::{Deserialize, Serialize};

/// A snapshot reference the remote store recorded on a successful save.
/// Usable as a rollback target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionEntry {
    pub id: String,
    pub section: String,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// One line of the remote audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: String,
    pub section: String,
    /// `"save"` or `"rollback"`
    pub action: String,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

/// Anything with a creation timestamp that history lists are sorted by.
pub trait Timestamped {
    fn created_at(&self) -> u64;
}

impl Timestamped for VersionEntry {
    fn created_at(&self) -> u64 {
        self.created_at
    }
}

impl Timestamped for AuditEntry {
    fn created_at(&self) -> u64 {
        self.created_at
    }
}

/// Sort most-recent-first and cap at `limit`.
///
/// The sort is stable, so entries sharing a timestamp keep the order the
/// server sent them in.
pub fn most_recent_first<T: Timestamped>(mut entries: Vec<T>, limit: usize) -> Vec<T> {
    entries.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
    entries.truncate(limit);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(id: &str, at: u64) -> VersionEntry {
        VersionEntry {
            id: id.into(),
            section: "hero".into(),
            created_at: at,
            created_by: None,
            note: None,
        }
    }

    #[test]
    fn test_most_recent_first_sorts_and_caps() {
        let entries = vec![version("v1", 10), version("v3", 30), version("v2", 20)];
        let sorted = most_recent_first(entries, 2);
        let ids: Vec<_> = sorted.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, ["v3", "v2"]);
    }

    #[test]
    fn test_version_entry_wire_shape() {
        let json = r#"{"id":"v1","section":"hero","createdAt":1700000000000,"createdBy":"ana"}"#;
        let entry: VersionEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.id, "v1");
        assert_eq!(entry.created_by.as_deref(), Some("ana"));
        assert_eq!(entry.note, None);

        let back = serde_json::to_string(&entry).unwrap();
        assert!(!back.contains("note"));
    }
}
