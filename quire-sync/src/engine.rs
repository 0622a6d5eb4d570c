//! The sync engine: one instance per editing session.
//!
//! Owns the [`DocumentStore`], the [`SyncMachine`], the [`RemotePoller`] and
//! the [`HistoryClient`], and is the only place that talks to the remote
//! store. Network calls for saves, polls and history refreshes run as
//! spawned tasks; their results come back through [`SyncEngine::tick`] /
//! [`SyncEngine::next_completion`] and are turned into machine events. Every
//! other handler runs to completion synchronously.
//!
//! ```text
//!   patch_section ──► DocumentStore ──► fingerprint ──► SyncMachine
//!                       │ (cache)                          │ effects
//!                       ▼                                  ▼
//!                   LocalCache                     spawn save / history
//!                                                          │
//!   tick ──► due timers ──► SyncMachine                     ▼
//!        └─► reap tasks ──► SaveSucceeded / SaveFailed ◄── RemoteStore
//! ```

use futures_util::FutureExt;
use quire_core::{fingerprint, AuditEntry, ContentDocument, Fingerprint, VersionEntry};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use uuid::Uuid;

use crate::cache::LocalCache;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::SyncError;
use crate::history::{rollback_and_reload, HistoryClient};
use crate::machine::{Effect, SyncEvent, SyncMachine};
use crate::poller::{PollDecision, PollOutcome, RemotePoller};
use crate::remote::{RemoteError, RemoteStore, SaveReceipt, SaveRequest};
use crate::status::PersistenceState;
use crate::store::DocumentStore;

/// Result of a finished background task.
#[derive(Debug)]
pub(crate) enum Completion {
    Save {
        attempted: Fingerprint,
        result: Result<SaveReceipt, RemoteError>,
    },
    Poll {
        epoch: u64,
        result: Result<ContentDocument, RemoteError>,
    },
    History(Result<Vec<VersionEntry>, RemoteError>),
}

/// Report returned by [`SyncEngine::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Teardown {
    /// Local edits never reached the remote store. They survive in the
    /// local cache only.
    pub unsaved_changes: bool,
}

pub struct SyncEngine<R: RemoteStore> {
    config: EngineConfig,
    session_id: Uuid,
    remote: Arc<R>,
    clock: Arc<dyn Clock>,

    store: DocumentStore,
    machine: SyncMachine,
    poller: RemotePoller,
    history: HistoryClient,

    tasks: JoinSet<Completion>,
    /// Bumped whenever the known remote state moves under our own action;
    /// poll results fetched under an older epoch are stale.
    poll_epoch: u64,
    state_tx: watch::Sender<PersistenceState>,
    shut_down: bool,
}

impl<R: RemoteStore> SyncEngine<R> {
    /// Create an engine on the system clock.
    pub fn new(config: EngineConfig, remote: Arc<R>, cache: Box<dyn LocalCache>) -> Self {
        Self::with_clock(config, remote, cache, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: EngineConfig,
        remote: Arc<R>,
        cache: Box<dyn LocalCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let machine = SyncMachine::new(&config);
        let (state_tx, _) = watch::channel(machine.state().clone());
        Self {
            session_id: Uuid::new_v4(),
            remote,
            clock,
            store: DocumentStore::new(cache),
            poller: RemotePoller::new(config.poll_interval(), config.poll_policy),
            history: HistoryClient::new(config.history_limit),
            machine,
            config,
            tasks: JoinSet::new(),
            poll_epoch: 0,
            state_tx,
            shut_down: false,
        }
    }

    // ─── Accessors ───────────────────────────────────────────────────────

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &PersistenceState {
        self.machine.state()
    }

    /// Watch channel carrying every state change.
    pub fn subscribe(&self) -> watch::Receiver<PersistenceState> {
        self.state_tx.subscribe()
    }

    pub fn document(&self) -> &ContentDocument {
        self.store.document()
    }

    pub fn get_section(&self, name: &str) -> Option<&Value> {
        self.store.get_section(name)
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.store.fingerprint()
    }

    pub fn acknowledged_fingerprint(&self) -> Option<&Fingerprint> {
        self.machine.acknowledged()
    }

    pub fn known_remote_fingerprint(&self) -> Option<&Fingerprint> {
        self.machine.known_remote()
    }

    pub fn is_saving(&self) -> bool {
        self.machine.is_saving()
    }

    pub fn versions(&self) -> &[VersionEntry] {
        self.history.versions()
    }

    pub fn audits(&self) -> &[AuditEntry] {
        self.history.audits()
    }

    /// Background tasks not yet reaped.
    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Earliest armed timer across scheduler, retry and poller.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.machine.next_deadline(), self.poller.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Initial read. Falls back to the local cache, then to configured
    /// defaults; either fallback leaves the engine in `error` but usable.
    pub async fn start(&mut self) -> &PersistenceState {
        self.publish();
        match self.remote.read_document().await {
            Ok(doc) => {
                let fingerprint = self.store.hydrate(doc);
                log::info!(
                    "Hydrated {} sections from remote ({fingerprint})",
                    self.store.document().len()
                );
                self.poll_epoch += 1;
                self.apply(SyncEvent::Hydrated { fingerprint });
                self.spawn_history_refresh();
            }
            Err(e) => {
                let (doc, source) = match self.store.load_cached() {
                    Some(doc) => (doc, "local cache"),
                    None => (self.config.defaults.clone(), "built-in defaults"),
                };
                self.store.hydrate(doc);
                let message = format!("Initial load failed ({}); using {source}", e.message());
                log::warn!("{message}");
                self.apply(SyncEvent::HydrateFailed { message });
            }
        }
        self.poller.arm(self.clock.now());
        self.machine.state()
    }

    /// Cancel every timer and background task.
    ///
    /// Returns whether unsaved edits remain; the warning is advisory, the
    /// edits are only in the local cache at this point.
    pub fn shutdown(&mut self) -> Teardown {
        self.tasks.abort_all();
        self.machine.cancel_timers();
        self.poller.disarm();
        self.poller.set_in_flight(false);
        self.shut_down = true;

        let unsaved_changes = self.machine.state().pending_changes;
        if unsaved_changes {
            log::warn!("Sync engine shut down with unsaved changes");
        } else {
            log::info!("Sync engine shut down");
        }
        Teardown { unsaved_changes }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    // ─── Mutations ───────────────────────────────────────────────────────

    /// Shallow-merge into a section and schedule a save if it diverges.
    pub fn patch_section(&mut self, name: &str, partial: Value) {
        let fingerprint = self.store.patch_section(name, partial);
        self.apply(SyncEvent::MutationOccurred { fingerprint });
    }

    pub fn replace_section(&mut self, name: &str, value: Value) {
        let fingerprint = self.store.replace_section(name, value);
        self.apply(SyncEvent::MutationOccurred { fingerprint });
    }

    /// Save now, bypassing debounce and backoff. Resumes from `error`.
    pub fn retry_now(&mut self) {
        let fingerprint = self.store.fingerprint();
        self.apply(SyncEvent::RetryRequested { fingerprint });
    }

    pub fn set_foreground(&mut self, foreground: bool) {
        if self.poller.is_foreground() != foreground {
            log::debug!("Surface foreground: {foreground}");
        }
        self.poller.set_foreground(foreground);
    }

    // ─── Timers and completions ──────────────────────────────────────────

    /// Reap finished tasks, then fire every timer that is due.
    pub fn tick(&mut self) {
        self.reap();
        if self.shut_down {
            return;
        }

        let now = self.clock.now();
        if self.machine.debounce_due(now) {
            let fingerprint = self.store.fingerprint();
            self.apply(SyncEvent::DebounceExpired { fingerprint });
        }
        if self.machine.retry_due(now) {
            let fingerprint = self.store.fingerprint();
            self.apply(SyncEvent::RetryDue { fingerprint });
        }
        if self.poller.due(now) {
            self.poller.arm(now);
            match self.poller.check(self.machine.is_saving()) {
                Ok(()) => self.spawn_poll(),
                Err(skip) => log::debug!("Poll skipped: {skip:?}"),
            }
        }
    }

    /// Wait for the next background task and apply its result.
    /// Returns `false` when nothing is running.
    pub async fn next_completion(&mut self) -> bool {
        match self.tasks.join_next().await {
            Some(joined) => {
                self.on_joined(joined);
                true
            }
            None => false,
        }
    }

    /// Drain background work, including saves chained off completions.
    pub async fn settle(&mut self) {
        while self.next_completion().await {}
    }

    pub(crate) async fn join_next(&mut self) -> Option<Result<Completion, JoinError>> {
        self.tasks.join_next().await
    }

    pub(crate) fn clock_now(&self) -> Instant {
        self.clock.now()
    }

    fn reap(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            self.on_joined(joined);
        }
    }

    pub(crate) fn on_joined(&mut self, joined: Result<Completion, JoinError>) {
        match joined {
            Ok(completion) => self.on_completion(completion),
            Err(e) if e.is_cancelled() => {}
            Err(e) => log::error!("Background task failed: {e}"),
        }
    }

    fn on_completion(&mut self, completion: Completion) {
        if self.shut_down {
            return;
        }
        match completion {
            Completion::Save { attempted, result } => {
                let current = self.store.fingerprint();
                match result {
                    Ok(receipt) => {
                        log::info!(
                            "Saved {attempted}, changed sections: {:?}",
                            receipt.changed_sections
                        );
                        self.apply(SyncEvent::SaveSucceeded {
                            attempted,
                            current,
                            saved_at: receipt
                                .saved_at
                                .unwrap_or_else(|| self.clock.epoch_millis()),
                            changed_sections: receipt.changed_sections,
                        });
                    }
                    Err(e) => {
                        log::warn!("Save of {attempted} failed: {e}");
                        self.apply(SyncEvent::SaveFailed {
                            attempted,
                            current,
                            message: e.message(),
                            retryable: e.is_retryable(),
                        });
                    }
                }
            }
            Completion::Poll { epoch, result } => {
                self.poller.set_in_flight(false);
                match result {
                    Ok(_) if epoch != self.poll_epoch => {
                        log::debug!("Discarding stale poll result");
                    }
                    Ok(doc) => {
                        self.apply_poll(doc);
                    }
                    Err(e) => log::debug!("Poll failed: {e}"),
                }
            }
            Completion::History(result) => match result {
                Ok(versions) => self.history.apply_versions(versions),
                Err(e) => log::warn!("History refresh failed: {e}"),
            },
        }
    }

    // ─── Remote poller ───────────────────────────────────────────────────

    /// Fetch the remote document now and apply it.
    pub async fn poll_once(&mut self) -> PollOutcome {
        self.reap();
        if let Err(skip) = self.poller.check(self.machine.is_saving()) {
            return PollOutcome::Skipped(skip);
        }
        match self.remote.read_document().await {
            Ok(doc) => self.apply_poll(doc),
            Err(e) => {
                log::debug!("Poll failed: {e}");
                PollOutcome::Failed(e.message())
            }
        }
    }

    fn apply_poll(&mut self, doc: ContentDocument) -> PollOutcome {
        let remote_fingerprint = fingerprint(&doc);
        let pending = self.machine.state().pending_changes;
        let decision =
            self.poller
                .decide(&remote_fingerprint, self.machine.known_remote(), pending);

        match decision {
            PollDecision::Unchanged => PollOutcome::Unchanged,
            PollDecision::KeepLocal => {
                log::info!("Remote changed ({remote_fingerprint}), keeping pending local edits");
                PollOutcome::KeptLocal
            }
            PollDecision::Replace => {
                if pending {
                    log::warn!("Remote changed ({remote_fingerprint}), overwriting pending local edits");
                } else {
                    log::info!("Remote changed ({remote_fingerprint}), reloading");
                }
                let fingerprint = self.store.replace_document(doc);
                self.apply(SyncEvent::RemoteReplaced {
                    fingerprint: fingerprint.clone(),
                });
                PollOutcome::Replaced { fingerprint }
            }
        }
    }

    // ─── History and rollback ────────────────────────────────────────────

    pub async fn refresh_history(&mut self) -> Result<Vec<VersionEntry>, SyncError> {
        let versions = self.history.refresh(self.remote.as_ref()).await?;
        Ok(versions.to_vec())
    }

    pub async fn refresh_audits(&mut self) -> Result<Vec<AuditEntry>, SyncError> {
        let audits = self.history.refresh_audits(self.remote.as_ref()).await?;
        Ok(audits.to_vec())
    }

    /// Revert one section to `version_id` on the remote, then re-hydrate.
    ///
    /// On failure the local document is untouched and the state goes to
    /// `error` with the server's message.
    pub async fn rollback_section(&mut self, version_id: &str) -> Result<(), SyncError> {
        if self.shut_down {
            return Err(SyncError::ShutDown);
        }
        self.reap();
        if self.machine.is_saving() {
            return Err(SyncError::SaveInFlight);
        }

        match rollback_and_reload(self.remote.as_ref(), version_id).await {
            Ok(doc) => {
                let fingerprint = self.store.hydrate(doc);
                log::info!("Rolled back to {version_id}, now at {fingerprint}");
                self.poll_epoch += 1;
                self.apply(SyncEvent::RolledBack { fingerprint });
                Ok(())
            }
            Err(e) => {
                log::warn!("Rollback to {version_id} failed: {e}");
                self.apply(SyncEvent::RollbackFailed { message: e.message() });
                Err(e.into())
            }
        }
    }

    // ─── Internals ───────────────────────────────────────────────────────

    fn apply(&mut self, event: SyncEvent) {
        if self.shut_down {
            return;
        }
        let effects = self.machine.handle(event, self.clock.now());
        self.publish();
        for effect in effects {
            match effect {
                Effect::StartSave { fingerprint, attempt } => self.spawn_save(fingerprint, attempt),
                Effect::RefreshHistory => self.spawn_history_refresh(),
            }
        }
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.machine.state().clone());
    }

    fn spawn_save(&mut self, attempted: Fingerprint, attempt: u32) {
        log::debug!("Starting save of {attempted} (attempt {attempt})");
        // Our own save moves the remote; polls fetched before it are stale
        self.poll_epoch += 1;
        let remote = self.remote.clone();
        let request = SaveRequest {
            session_id: self.session_id,
            document: self.store.document().without_transient(),
        };
        self.tasks.spawn(async move {
            let result = AssertUnwindSafe(remote.save_document(request))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(RemoteError::Transport("save task panicked".into())));
            Completion::Save { attempted, result }
        });
    }

    fn spawn_poll(&mut self) {
        self.poller.set_in_flight(true);
        let remote = self.remote.clone();
        let epoch = self.poll_epoch;
        self.tasks.spawn(async move {
            let result = AssertUnwindSafe(remote.read_document())
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(RemoteError::Transport("poll task panicked".into())));
            Completion::Poll { epoch, result }
        });
    }

    fn spawn_history_refresh(&mut self) {
        let remote = self.remote.clone();
        let limit = self.history.limit();
        self.tasks.spawn(async move {
            Completion::History(remote.read_versions(limit).await)
        });
    }
}
