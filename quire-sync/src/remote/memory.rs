//! In-process authoritative store.
//!
//! Behaves like the real remote: every save computes which sections
//! actually changed, records one [`VersionEntry`] per changed section and an
//! audit line, and rollbacks restore the section value captured by a
//! version. On top of that it can inject scripted faults and hold saves
//! open, which is how retry and single-flight behavior get exercised.

use async_trait::async_trait;
use quire_core::{
    fingerprint_value, most_recent_first, AuditEntry, ContentDocument, VersionEntry,
};
use serde_json::Value;
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Semaphore;

use super::{RemoteError, RemoteStore, SaveReceipt, SaveRequest};
use crate::clock::unix_millis;

/// A scripted failure for the next matching request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    Transport,
    Status(u16, String),
    Rejected(String),
}

impl From<Fault> for RemoteError {
    fn from(fault: Fault) -> Self {
        match fault {
            Fault::Transport => RemoteError::Transport("connection reset by peer".into()),
            Fault::Status(status, message) => RemoteError::Status { status, message },
            Fault::Rejected(message) => RemoteError::Rejected(message),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredVersion {
    entry: VersionEntry,
    value: Value,
}

#[derive(Debug, Default)]
struct Inner {
    document: ContentDocument,
    versions: Vec<StoredVersion>,
    audits: Vec<AuditEntry>,
    next_version: u64,
    next_audit: u64,
    last_timestamp: u64,
    save_faults: VecDeque<Fault>,
    read_faults: VecDeque<Fault>,
    rollback_faults: VecDeque<Fault>,
}

impl Inner {
    /// Strictly increasing wall-clock milliseconds.
    fn timestamp(&mut self) -> u64 {
        self.last_timestamp = unix_millis().max(self.last_timestamp + 1);
        self.last_timestamp
    }

    fn record_version(&mut self, section: &str, value: Value, created_by: &str, note: Option<String>) {
        self.next_version += 1;
        let created_at = self.timestamp();
        self.versions.push(StoredVersion {
            entry: VersionEntry {
                id: format!("v{}", self.next_version),
                section: section.to_string(),
                created_at,
                created_by: Some(created_by.to_string()),
                note,
            },
            value,
        });
    }

    fn record_audit(&mut self, section: &str, action: &str, created_by: &str) {
        self.next_audit += 1;
        let created_at = self.timestamp();
        self.audits.push(AuditEntry {
            id: format!("a{}", self.next_audit),
            section: section.to_string(),
            action: action.to_string(),
            created_at,
            created_by: Some(created_by.to_string()),
        });
    }

    fn save(&mut self, document: ContentDocument, created_by: &str) -> SaveReceipt {
        let names: BTreeSet<String> = self
            .document
            .section_names()
            .chain(document.section_names())
            .map(str::to_string)
            .collect();

        let changed: Vec<String> = names
            .into_iter()
            .filter(|name| {
                let before = self.document.section(name).map(fingerprint_value);
                let after = document.section(name).map(fingerprint_value);
                before != after
            })
            .collect();

        for name in &changed {
            if let Some(value) = document.section(name) {
                self.record_version(name, value.clone(), created_by, None);
            }
            self.record_audit(name, "save", created_by);
        }

        self.document = document;
        SaveReceipt {
            saved_at: Some(self.timestamp()),
            changed_sections: changed,
        }
    }
}

/// In-memory [`RemoteStore`].
#[derive(Debug, Default)]
pub struct MemoryRemote {
    inner: Mutex<Inner>,
    save_gate: Mutex<Option<Arc<Semaphore>>>,
    saves_started: AtomicUsize,
    saves_in_flight: AtomicUsize,
    max_concurrent_saves: AtomicUsize,
    reads: AtomicUsize,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(document: ContentDocument) -> Self {
        let remote = Self::default();
        remote.lock().document = document;
        remote
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current authoritative document.
    pub fn document(&self) -> ContentDocument {
        self.lock().document.clone()
    }

    /// Save on behalf of another session, bypassing faults and gates.
    pub fn save_as(&self, session: &str, document: ContentDocument) -> SaveReceipt {
        self.lock().save(document, session)
    }

    /// Queue faults returned by the next saves, in order.
    pub fn fail_saves(&self, faults: impl IntoIterator<Item = Fault>) {
        self.lock().save_faults.extend(faults);
    }

    /// Queue faults returned by the next document reads, in order.
    pub fn fail_reads(&self, faults: impl IntoIterator<Item = Fault>) {
        self.lock().read_faults.extend(faults);
    }

    pub fn fail_rollbacks(&self, faults: impl IntoIterator<Item = Fault>) {
        self.lock().rollback_faults.extend(faults);
    }

    /// Block subsequent saves until [`release_save`](Self::release_save).
    pub fn hold_saves(&self) {
        if let Ok(mut gate) = self.save_gate.lock() {
            *gate = Some(Arc::new(Semaphore::new(0)));
        }
    }

    /// Let one held save through.
    pub fn release_save(&self) {
        if let Ok(gate) = self.save_gate.lock() {
            if let Some(semaphore) = gate.as_ref() {
                semaphore.add_permits(1);
            }
        }
    }

    /// Stop holding saves and release every waiter.
    pub fn open_saves(&self) {
        if let Ok(mut gate) = self.save_gate.lock() {
            if let Some(semaphore) = gate.take() {
                semaphore.close();
            }
        }
    }

    pub fn saves_started(&self) -> usize {
        self.saves_started.load(Ordering::SeqCst)
    }

    pub fn saves_in_flight(&self) -> usize {
        self.saves_in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of saves that were ever executing at once.
    pub fn max_concurrent_saves(&self) -> usize {
        self.max_concurrent_saves.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Every version, most recent first, uncapped.
    pub fn all_versions(&self) -> Vec<VersionEntry> {
        let entries: Vec<VersionEntry> = self.lock().versions.iter().map(|v| v.entry.clone()).collect();
        most_recent_first(entries, usize::MAX)
    }

    /// Section value captured by a version.
    pub fn version_value(&self, version_id: &str) -> Option<Value> {
        self.lock()
            .versions
            .iter()
            .find(|v| v.entry.id == version_id)
            .map(|v| v.value.clone())
    }

    async fn pass_gate(&self) {
        let gate = self.save_gate.lock().ok().and_then(|gate| gate.clone());
        if let Some(semaphore) = gate {
            // A closed semaphore means the gate was opened
            if let Ok(permit) = semaphore.acquire().await {
                permit.forget();
            }
        }
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn read_document(&self) -> Result<ContentDocument, RemoteError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.lock();
        if let Some(fault) = inner.read_faults.pop_front() {
            return Err(fault.into());
        }
        Ok(inner.document.clone())
    }

    async fn save_document(&self, request: SaveRequest) -> Result<SaveReceipt, RemoteError> {
        self.saves_started.fetch_add(1, Ordering::SeqCst);
        let concurrent = self.saves_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_saves.fetch_max(concurrent, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.saves_in_flight);

        self.pass_gate().await;

        let mut inner = self.lock();
        if let Some(fault) = inner.save_faults.pop_front() {
            return Err(fault.into());
        }
        Ok(inner.save(request.document, &request.session_id.to_string()))
    }

    async fn read_versions(&self, limit: usize) -> Result<Vec<VersionEntry>, RemoteError> {
        let entries: Vec<VersionEntry> = self.lock().versions.iter().map(|v| v.entry.clone()).collect();
        Ok(most_recent_first(entries, limit))
    }

    async fn read_audits(&self, limit: usize) -> Result<Vec<AuditEntry>, RemoteError> {
        let entries = self.lock().audits.clone();
        Ok(most_recent_first(entries, limit))
    }

    async fn rollback(&self, version_id: &str) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        if let Some(fault) = inner.rollback_faults.pop_front() {
            return Err(fault.into());
        }

        let Some(target) = inner
            .versions
            .iter()
            .find(|v| v.entry.id == version_id)
            .cloned()
        else {
            return Err(RemoteError::Rejected(format!("version {version_id} not found")));
        };

        let section = target.entry.section.clone();
        let created_by = "rollback";
        inner.document.set_section(section.clone(), target.value.clone());
        inner.record_version(
            &section,
            target.value,
            created_by,
            Some(format!("rollback to {version_id}")),
        );
        inner.record_audit(&section, "rollback", created_by);
        log::info!("Rolled back section '{section}' to {version_id}");
        Ok(())
    }
}
