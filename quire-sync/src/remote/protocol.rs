//! JSON bodies exchanged with the remote store.
//!
//! ```text
//! GET  {endpoint}                      → { "data": {...} }
//! GET  {endpoint}?versions=1&limit=N   → { "versions": [...] }
//! GET  {endpoint}?audits=1&limit=N     → { "audits": [...] }
//! PUT  {endpoint}  { data, sessionId } → { "savedAt": ms, "changedSections": [...] }
//! POST {endpoint}  { action: "rollback", versionId } → { "ok": true } | { "error": "..." }
//! ```
//! Any non-2xx response may carry `{ "error": "..." }`.

use quire_core::{AuditEntry, ContentDocument, VersionEntry};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ROLLBACK_ACTION: &str = "rollback";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResponse {
    pub data: ContentDocument,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionsResponse {
    #[serde(default)]
    pub versions: Vec<VersionEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditsResponse {
    #[serde(default)]
    pub audits: Vec<AuditEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveBody<'a> {
    pub data: &'a ContentDocument,
    pub session_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveResponse {
    #[serde(default)]
    pub saved_at: Option<u64>,
    #[serde(default)]
    pub changed_sections: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackBody<'a> {
    pub action: &'a str,
    pub version_id: &'a str,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackResponse {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
