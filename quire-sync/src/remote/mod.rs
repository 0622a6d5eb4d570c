//! The remote authoritative store, seen from the engine.
//!
//! ```text
//! SyncEngine ──► RemoteStore ─┬─► HttpRemote   (JSON over HTTP)
//!                             └─► MemoryRemote (in-process authority)
//! ```

pub mod http;
pub mod memory;
pub mod protocol;

use async_trait::async_trait;
use quire_core::{AuditEntry, ContentDocument, VersionEntry};
use thiserror::Error;
use uuid::Uuid;

pub use http::{HttpRemote, HttpRemoteConfig};
pub use memory::{Fault, MemoryRemote};

/// Failures talking to the remote store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Unreachable, connection reset, timed out
    #[error("transport failure: {0}")]
    Transport(String),
    /// Non-2xx response; `message` is the server's `error` field when present
    #[error("remote store returned {status}: {message}")]
    Status { status: u16, message: String },
    /// 2xx response whose body could not be understood
    #[error("malformed response: {0}")]
    Decode(String),
    /// Successful transport, explicit `{ "error": ... }` in the body
    #[error("{0}")]
    Rejected(String),
}

impl RemoteError {
    /// Whether retrying the same request could plausibly succeed.
    ///
    /// Transport failures, garbled responses, 408, 429 and 5xx retry;
    /// every other status and explicit rejections are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Transport(_) | RemoteError::Decode(_) => true,
            RemoteError::Status { status, .. } => {
                *status >= 500 || *status == 429 || *status == 408
            }
            RemoteError::Rejected(_) => false,
        }
    }

    /// Human-readable message for `PersistenceState::last_error`.
    pub fn message(&self) -> String {
        match self {
            RemoteError::Status { message, .. } | RemoteError::Rejected(message)
                if !message.is_empty() =>
            {
                message.clone()
            }
            other => other.to_string(),
        }
    }
}

/// Full-document save, tagged with the session that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveRequest {
    pub session_id: Uuid,
    pub document: ContentDocument,
}

/// What the remote store reports after a successful save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReceipt {
    /// Milliseconds since the Unix epoch; `None` when the store omits it
    pub saved_at: Option<u64>,
    pub changed_sections: Vec<String>,
}

/// Request/response contract of the remote store.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    async fn read_document(&self) -> Result<ContentDocument, RemoteError>;

    /// Idempotent full-document replace.
    async fn save_document(&self, request: SaveRequest) -> Result<SaveReceipt, RemoteError>;

    async fn read_versions(&self, limit: usize) -> Result<Vec<VersionEntry>, RemoteError>;

    async fn read_audits(&self, limit: usize) -> Result<Vec<AuditEntry>, RemoteError>;

    /// Revert the section recorded by `version_id`. Does not return the new
    /// document; callers re-read.
    async fn rollback(&self, version_id: &str) -> Result<(), RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_taxonomy() {
        assert!(RemoteError::Transport("connection refused".into()).is_retryable());
        assert!(RemoteError::Decode("eof".into()).is_retryable());
        assert!(RemoteError::Status { status: 503, message: String::new() }.is_retryable());
        assert!(RemoteError::Status { status: 429, message: String::new() }.is_retryable());
        assert!(RemoteError::Status { status: 408, message: String::new() }.is_retryable());

        assert!(!RemoteError::Status { status: 400, message: "bad".into() }.is_retryable());
        assert!(!RemoteError::Status { status: 401, message: String::new() }.is_retryable());
        assert!(!RemoteError::Rejected("unknown version".into()).is_retryable());
    }

    #[test]
    fn test_message_prefers_server_text() {
        let err = RemoteError::Status { status: 422, message: "title too long".into() };
        assert_eq!(err.message(), "title too long");

        let err = RemoteError::Status { status: 502, message: String::new() };
        assert_eq!(err.message(), "remote store returned 502: ");

        let err = RemoteError::Transport("timed out".into());
        assert_eq!(err.message(), "transport failure: timed out");
    }
}
