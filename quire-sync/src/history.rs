//! Version/rollback client.
//!
//! Keeps the last fetched, capped, most-recent-first version list (and the
//! audit trail) for the UI. The remote store stays authoritative; this is a
//! read-through view.

use quire_core::{most_recent_first, AuditEntry, ContentDocument, VersionEntry};

use crate::remote::{RemoteError, RemoteStore};

#[derive(Debug, Clone)]
pub struct HistoryClient {
    limit: usize,
    versions: Vec<VersionEntry>,
    audits: Vec<AuditEntry>,
}

impl HistoryClient {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            versions: Vec::new(),
            audits: Vec::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn versions(&self) -> &[VersionEntry] {
        &self.versions
    }

    pub fn audits(&self) -> &[AuditEntry] {
        &self.audits
    }

    pub fn versions_for<'a>(&'a self, section: &'a str) -> impl Iterator<Item = &'a VersionEntry> {
        self.versions.iter().filter(move |v| v.section == section)
    }

    pub fn find(&self, version_id: &str) -> Option<&VersionEntry> {
        self.versions.iter().find(|v| v.id == version_id)
    }

    /// Install a fetched list. Re-sorted and capped; servers are not trusted
    /// to honor either.
    pub fn apply_versions(&mut self, versions: Vec<VersionEntry>) {
        self.versions = most_recent_first(versions, self.limit);
    }

    pub fn apply_audits(&mut self, audits: Vec<AuditEntry>) {
        self.audits = most_recent_first(audits, self.limit);
    }

    pub async fn refresh<R: RemoteStore + ?Sized>(
        &mut self,
        remote: &R,
    ) -> Result<&[VersionEntry], RemoteError> {
        let versions = remote.read_versions(self.limit).await?;
        self.apply_versions(versions);
        Ok(&self.versions)
    }

    pub async fn refresh_audits<R: RemoteStore + ?Sized>(
        &mut self,
        remote: &R,
    ) -> Result<&[AuditEntry], RemoteError> {
        let audits = remote.read_audits(self.limit).await?;
        self.apply_audits(audits);
        Ok(&self.audits)
    }
}

/// Ask the remote to revert, then re-read the whole document.
///
/// The rollback response carries no document; the fresh read is what the
/// caller hydrates from.
pub async fn rollback_and_reload<R: RemoteStore + ?Sized>(
    remote: &R,
    version_id: &str,
) -> Result<ContentDocument, RemoteError> {
    remote.rollback(version_id).await?;
    remote.read_document().await
}
