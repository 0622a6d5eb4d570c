//! Observable persistence state consumed by the UI layer.

use serde::Serialize;
use std::fmt;

/// Lifecycle status of the local document relative to the remote copy.
///
/// | Status     | Meaning                                                   |
/// |------------|-----------------------------------------------------------|
/// | `Hydrating`| initial remote read in progress                           |
/// | `Idle`     | local fingerprint equals the acknowledged remote one      |
/// | `Draft`    | local differs, debounce armed, no save attempted yet      |
/// | `Saving`   | first save attempt in flight                              |
/// | `Retrying` | a save failed, retry scheduled or in flight               |
/// | `Saved`    | most recent save succeeded                                |
/// | `Error`    | retries exhausted or permanent failure, edits kept        |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceStatus {
    Hydrating,
    Idle,
    Draft,
    Saving,
    Retrying,
    Saved,
    Error,
}

impl PersistenceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PersistenceStatus::Hydrating => "hydrating",
            PersistenceStatus::Idle => "idle",
            PersistenceStatus::Draft => "draft",
            PersistenceStatus::Saving => "saving",
            PersistenceStatus::Retrying => "retrying",
            PersistenceStatus::Saved => "saved",
            PersistenceStatus::Error => "error",
        }
    }
}

impl fmt::Display for PersistenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the engine's persistence bookkeeping.
///
/// Only [`crate::machine::SyncMachine`] writes this; everyone else gets a
/// copy.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceState {
    pub status: PersistenceStatus,
    pub pending_changes: bool,
    pub retry_count: u32,
    /// Milliseconds since the Unix epoch
    pub last_saved_at: Option<u64>,
    pub last_error: Option<String>,
    pub changed_sections: Vec<String>,
}

impl Default for PersistenceState {
    fn default() -> Self {
        Self {
            status: PersistenceStatus::Hydrating,
            pending_changes: false,
            retry_count: 0,
            last_saved_at: None,
            last_error: None,
            changed_sections: Vec::new(),
        }
    }
}
