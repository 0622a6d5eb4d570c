//! Scheduler, retry controller and status machine as one pure state machine.
//!
//! ```text
//!            mutation (fp != ack)
//!   clean ─────────────────────────► debouncing ◄──── mutation (re-arms)
//!     ▲                                   │
//!     │ fp == ack                         │ DebounceExpired
//!     │                                   ▼
//!     │        SaveSucceeded        ┌──────────┐  DebounceExpired while in flight
//!     └──────────────────────────── │  saving  │ ───────────► queued = fp
//!                                   └────┬─────┘
//!                          SaveFailed    │
//!                    retry_count <= max  ▼
//!                                   retry wait ── RetryDue ──► saving
//!                    retry_count > max
//!                    or permanent   ──► error (edits kept)
//! ```
//!
//! [`SyncMachine::handle`] takes one [`SyncEvent`] plus the current time and
//! returns the [`Effect`]s the engine must perform. Timers are plain
//! deadlines; the engine asks for [`SyncMachine::next_deadline`] and feeds
//! `DebounceExpired`/`RetryDue` back when they pass. Nothing here does I/O.
//!
//! Invariant: at most one save is in flight (`in_flight.is_some()`).

use quire_core::Fingerprint;
use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::status::{PersistenceState, PersistenceStatus};

/// Discrete inputs to the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Initial remote read succeeded and the store holds the remote document.
    Hydrated { fingerprint: Fingerprint },
    /// Initial remote read failed; the store holds a cached or default copy.
    HydrateFailed { message: String },
    /// The local document changed; `fingerprint` is the new local one.
    MutationOccurred { fingerprint: Fingerprint },
    DebounceExpired { fingerprint: Fingerprint },
    RetryDue { fingerprint: Fingerprint },
    /// Caller asked to save now, e.g. from the error state.
    RetryRequested { fingerprint: Fingerprint },
    SaveSucceeded {
        attempted: Fingerprint,
        current: Fingerprint,
        saved_at: u64,
        changed_sections: Vec<String>,
    },
    SaveFailed {
        attempted: Fingerprint,
        current: Fingerprint,
        message: String,
        retryable: bool,
    },
    /// A poll replaced the local document with the remote one.
    RemoteReplaced { fingerprint: Fingerprint },
    RolledBack { fingerprint: Fingerprint },
    RollbackFailed { message: String },
}

/// Work the engine performs on the machine's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send the current document. `attempt` is the retry count at start.
    StartSave { fingerprint: Fingerprint, attempt: u32 },
    /// Fire-and-forget version history refresh.
    RefreshHistory,
}

#[derive(Debug, Clone)]
pub struct SyncMachine {
    debounce: Duration,
    retry_base_delay: Duration,
    max_retries: u32,

    state: PersistenceState,
    /// Last fingerprint the remote store acknowledged (or served us)
    acknowledged: Option<Fingerprint>,
    /// Last fingerprint observed on the remote side, via read or save
    known_remote: Option<Fingerprint>,
    in_flight: Option<Fingerprint>,
    queued: Option<Fingerprint>,
    debounce_at: Option<Instant>,
    retry_at: Option<Instant>,
}

impl SyncMachine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            debounce: config.debounce(),
            retry_base_delay: config.retry_base_delay(),
            max_retries: config.max_retries,
            state: PersistenceState::default(),
            acknowledged: None,
            known_remote: None,
            in_flight: None,
            queued: None,
            debounce_at: None,
            retry_at: None,
        }
    }

    pub fn state(&self) -> &PersistenceState {
        &self.state
    }

    pub fn acknowledged(&self) -> Option<&Fingerprint> {
        self.acknowledged.as_ref()
    }

    pub fn known_remote(&self) -> Option<&Fingerprint> {
        self.known_remote.as_ref()
    }

    pub fn in_flight(&self) -> Option<&Fingerprint> {
        self.in_flight.as_ref()
    }

    pub fn queued(&self) -> Option<&Fingerprint> {
        self.queued.as_ref()
    }

    pub fn is_saving(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn debounce_deadline(&self) -> Option<Instant> {
        self.debounce_at
    }

    pub fn retry_deadline(&self) -> Option<Instant> {
        self.retry_at
    }

    /// Earliest armed timer, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.debounce_at, self.retry_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn debounce_due(&self, now: Instant) -> bool {
        self.debounce_at.is_some_and(|at| at <= now)
    }

    pub fn retry_due(&self, now: Instant) -> bool {
        self.retry_at.is_some_and(|at| at <= now)
    }

    /// Drop all timers and forget the in-flight save. Used on teardown.
    pub fn cancel_timers(&mut self) {
        self.debounce_at = None;
        self.retry_at = None;
        self.in_flight = None;
        self.queued = None;
    }

    fn is_acknowledged(&self, fingerprint: &Fingerprint) -> bool {
        self.acknowledged.as_ref() == Some(fingerprint)
    }

    /// Apply one event. Returns the effects to perform, in order.
    pub fn handle(&mut self, event: SyncEvent, now: Instant) -> Vec<Effect> {
        match event {
            SyncEvent::Hydrated { fingerprint } => {
                self.adopt_remote(fingerprint);
                self.state.status = PersistenceStatus::Idle;
                self.state.last_error = None;
                Vec::new()
            }
            SyncEvent::HydrateFailed { message } => {
                self.acknowledged = None;
                self.known_remote = None;
                self.state.pending_changes = false;
                self.state.status = PersistenceStatus::Error;
                self.state.last_error = Some(message);
                Vec::new()
            }
            SyncEvent::MutationOccurred { fingerprint } => self.on_mutation(fingerprint, now),
            SyncEvent::DebounceExpired { fingerprint } => {
                self.debounce_at = None;
                if self.is_acknowledged(&fingerprint) {
                    self.settle_clean();
                    return Vec::new();
                }
                if self.in_flight.is_some() {
                    log::debug!("debounce fired during save, queueing {fingerprint}");
                    self.queued = Some(fingerprint);
                    return Vec::new();
                }
                self.start_save(fingerprint)
            }
            SyncEvent::RetryDue { fingerprint } => {
                self.retry_at = None;
                if self.in_flight.is_some() {
                    return Vec::new();
                }
                if self.is_acknowledged(&fingerprint) {
                    self.settle_clean();
                    return Vec::new();
                }
                self.start_save(fingerprint)
            }
            SyncEvent::RetryRequested { fingerprint } => {
                if self.in_flight.is_some() {
                    self.queued = Some(fingerprint);
                    return Vec::new();
                }
                self.debounce_at = None;
                self.retry_at = None;
                self.state.retry_count = 0;
                if self.is_acknowledged(&fingerprint) {
                    self.settle_clean();
                    return Vec::new();
                }
                self.start_save(fingerprint)
            }
            SyncEvent::SaveSucceeded {
                attempted,
                current,
                saved_at,
                changed_sections,
            } => self.on_save_succeeded(attempted, current, saved_at, changed_sections),
            SyncEvent::SaveFailed {
                attempted,
                current,
                message,
                retryable,
            } => self.on_save_failed(attempted, current, message, retryable, now),
            SyncEvent::RemoteReplaced { fingerprint } => {
                self.adopt_remote(fingerprint);
                if self.in_flight.is_none() {
                    self.state.status = PersistenceStatus::Idle;
                }
                Vec::new()
            }
            SyncEvent::RolledBack { fingerprint } => {
                self.adopt_remote(fingerprint);
                self.state.status = PersistenceStatus::Idle;
                self.state.last_error = None;
                vec![Effect::RefreshHistory]
            }
            SyncEvent::RollbackFailed { message } => {
                self.state.status = PersistenceStatus::Error;
                self.state.last_error = Some(message);
                Vec::new()
            }
        }
    }

    fn on_mutation(&mut self, fingerprint: Fingerprint, now: Instant) -> Vec<Effect> {
        if self.is_acknowledged(&fingerprint) {
            // Edited back to the saved value
            self.debounce_at = None;
            self.state.pending_changes = false;
            if self.in_flight.is_none() {
                self.retry_at = None;
                self.settle_clean();
            }
            return Vec::new();
        }

        self.state.pending_changes = true;
        self.debounce_at = Some(now + self.debounce);
        // A fresh debounce supersedes a scheduled retry; the save it triggers
        // carries the retry count forward.
        self.retry_at = None;

        if self.in_flight.is_none() {
            match self.state.status {
                PersistenceStatus::Retrying => {}
                PersistenceStatus::Error => {
                    self.state.retry_count = 0;
                    self.state.status = PersistenceStatus::Draft;
                }
                _ => self.state.status = PersistenceStatus::Draft,
            }
        }
        Vec::new()
    }

    fn on_save_succeeded(
        &mut self,
        attempted: Fingerprint,
        current: Fingerprint,
        saved_at: u64,
        changed_sections: Vec<String>,
    ) -> Vec<Effect> {
        self.in_flight = None;
        self.acknowledged = Some(attempted.clone());
        self.known_remote = Some(attempted.clone());
        self.retry_at = None;
        self.state.retry_count = 0;
        self.state.last_error = None;
        self.state.last_saved_at = Some(saved_at);
        self.state.changed_sections = changed_sections;
        self.state.status = PersistenceStatus::Saved;

        let mut effects = vec![Effect::RefreshHistory];
        let queued = self.queued.take();

        if current == attempted {
            self.debounce_at = None;
            self.state.pending_changes = false;
            return effects;
        }

        self.state.pending_changes = true;
        let queued_newer = queued.is_some_and(|q| q != attempted);
        if queued_newer || self.debounce_at.is_none() {
            self.debounce_at = None;
            effects.extend(self.start_save(current));
        } else {
            // Edits landed mid-save; their debounce is still running
            self.state.status = PersistenceStatus::Draft;
        }
        effects
    }

    fn on_save_failed(
        &mut self,
        attempted: Fingerprint,
        current: Fingerprint,
        message: String,
        retryable: bool,
        now: Instant,
    ) -> Vec<Effect> {
        self.in_flight = None;
        self.state.retry_count += 1;
        self.state.last_error = Some(message);
        let queued = self.queued.take();

        if self.is_acknowledged(&current) {
            // Local edits were reverted while the save was out
            self.debounce_at = None;
            self.retry_at = None;
            self.state.retry_count = 0;
            self.state.pending_changes = false;
            self.state.status = PersistenceStatus::Idle;
            return Vec::new();
        }
        self.state.pending_changes = true;

        if !retryable || self.state.retry_count > self.max_retries {
            self.retry_at = None;
            self.state.status = PersistenceStatus::Error;
            if queued.is_some_and(|q| q != attempted) {
                // Newer edits arrived during the final attempt: fresh cycle
                self.debounce_at = None;
                self.state.retry_count = 0;
                return self.start_save(current);
            }
            if !retryable {
                log::error!("save rejected permanently, not retrying");
            } else {
                log::error!(
                    "save failed {} times, giving up until the next edit",
                    self.state.retry_count
                );
            }
            return Vec::new();
        }

        let delay = self.retry_base_delay * self.state.retry_count;
        self.debounce_at = None;
        self.retry_at = Some(now + delay);
        self.state.status = PersistenceStatus::Retrying;
        Vec::new()
    }

    fn start_save(&mut self, fingerprint: Fingerprint) -> Vec<Effect> {
        debug_assert!(self.in_flight.is_none(), "second save started while one is in flight");
        self.in_flight = Some(fingerprint.clone());
        self.queued = None;
        self.state.pending_changes = true;
        self.state.status = if self.state.retry_count == 0 {
            PersistenceStatus::Saving
        } else {
            PersistenceStatus::Retrying
        };
        vec![Effect::StartSave {
            fingerprint,
            attempt: self.state.retry_count,
        }]
    }

    /// Local document equals the acknowledged one and nothing is in flight.
    fn settle_clean(&mut self) {
        self.state.pending_changes = false;
        self.state.retry_count = 0;
        if self.in_flight.is_none() {
            self.state.status = PersistenceStatus::Idle;
        }
    }

    /// Local document now mirrors the remote one exactly.
    fn adopt_remote(&mut self, fingerprint: Fingerprint) {
        self.acknowledged = Some(fingerprint.clone());
        self.known_remote = Some(fingerprint);
        self.debounce_at = None;
        self.retry_at = None;
        self.queued = None;
        self.state.pending_changes = false;
        self.state.retry_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_core::{fingerprint, ContentDocument};
    use serde_json::json;

    fn fp(title: &str) -> Fingerprint {
        fingerprint(&ContentDocument::new().with_section("hero", json!({ "title": title })))
    }

    fn hydrated(now: Instant) -> SyncMachine {
        let mut machine = SyncMachine::new(&EngineConfig::default());
        machine.handle(SyncEvent::Hydrated { fingerprint: fp("F0") }, now);
        machine
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_starts_hydrating() {
        let machine = SyncMachine::new(&EngineConfig::default());
        assert_eq!(machine.state().status, PersistenceStatus::Hydrating);
        assert!(machine.next_deadline().is_none());
    }

    #[test]
    fn test_mutation_arms_debounce_and_drafts() {
        let t0 = Instant::now();
        let mut machine = hydrated(t0);

        let effects = machine.handle(SyncEvent::MutationOccurred { fingerprint: fp("F1") }, t0);
        assert!(effects.is_empty());
        assert_eq!(machine.state().status, PersistenceStatus::Draft);
        assert!(machine.state().pending_changes);
        assert_eq!(machine.debounce_deadline(), Some(t0 + ms(800)));
    }

    #[test]
    fn test_mutation_back_to_acknowledged_is_clean() {
        let t0 = Instant::now();
        let mut machine = hydrated(t0);

        machine.handle(SyncEvent::MutationOccurred { fingerprint: fp("F1") }, t0);
        machine.handle(SyncEvent::MutationOccurred { fingerprint: fp("F0") }, t0 + ms(100));

        assert_eq!(machine.state().status, PersistenceStatus::Idle);
        assert!(!machine.state().pending_changes);
        assert!(machine.debounce_deadline().is_none());
    }

    #[test]
    fn test_mutations_reset_debounce() {
        let t0 = Instant::now();
        let mut machine = hydrated(t0);

        machine.handle(SyncEvent::MutationOccurred { fingerprint: fp("a") }, t0);
        machine.handle(SyncEvent::MutationOccurred { fingerprint: fp("ab") }, t0 + ms(500));
        assert!(!machine.debounce_due(t0 + ms(900)));
        assert!(machine.debounce_due(t0 + ms(1300)));
    }

    #[test]
    fn test_debounce_expiry_starts_single_save() {
        let t0 = Instant::now();
        let mut machine = hydrated(t0);
        machine.handle(SyncEvent::MutationOccurred { fingerprint: fp("F1") }, t0);

        let effects = machine.handle(SyncEvent::DebounceExpired { fingerprint: fp("F1") }, t0 + ms(800));
        assert_eq!(
            effects,
            vec![Effect::StartSave { fingerprint: fp("F1"), attempt: 0 }]
        );
        assert_eq!(machine.state().status, PersistenceStatus::Saving);
        assert_eq!(machine.in_flight(), Some(&fp("F1")));
    }

    #[test]
    fn test_debounce_during_flight_queues_instead_of_saving() {
        let t0 = Instant::now();
        let mut machine = hydrated(t0);
        machine.handle(SyncEvent::MutationOccurred { fingerprint: fp("F1") }, t0);
        machine.handle(SyncEvent::DebounceExpired { fingerprint: fp("F1") }, t0 + ms(800));

        machine.handle(SyncEvent::MutationOccurred { fingerprint: fp("F2") }, t0 + ms(900));
        let effects = machine.handle(SyncEvent::DebounceExpired { fingerprint: fp("F2") }, t0 + ms(1700));
        assert!(effects.is_empty());
        assert_eq!(machine.queued(), Some(&fp("F2")));
        assert_eq!(machine.state().status, PersistenceStatus::Saving);

        // Completion of the first save immediately starts the queued one,
        // using the current document (F3), not the queued snapshot.
        machine.handle(SyncEvent::MutationOccurred { fingerprint: fp("F3") }, t0 + ms(1750));
        let effects = machine.handle(
            SyncEvent::SaveSucceeded {
                attempted: fp("F1"),
                current: fp("F3"),
                saved_at: 1,
                changed_sections: vec!["hero".into()],
            },
            t0 + ms(1800),
        );
        assert_eq!(
            effects,
            vec![
                Effect::RefreshHistory,
                Effect::StartSave { fingerprint: fp("F3"), attempt: 0 },
            ]
        );
        assert_eq!(machine.acknowledged(), Some(&fp("F1")));
        assert!(machine.debounce_deadline().is_none());
    }

    #[test]
    fn test_success_with_unexpired_debounce_waits() {
        let t0 = Instant::now();
        let mut machine = hydrated(t0);
        machine.handle(SyncEvent::MutationOccurred { fingerprint: fp("F1") }, t0);
        machine.handle(SyncEvent::DebounceExpired { fingerprint: fp("F1") }, t0 + ms(800));
        machine.handle(SyncEvent::MutationOccurred { fingerprint: fp("F2") }, t0 + ms(850));

        let effects = machine.handle(
            SyncEvent::SaveSucceeded {
                attempted: fp("F1"),
                current: fp("F2"),
                saved_at: 1,
                changed_sections: vec![],
            },
            t0 + ms(900),
        );
        assert_eq!(effects, vec![Effect::RefreshHistory]);
        assert_eq!(machine.state().status, PersistenceStatus::Draft);
        assert!(machine.state().pending_changes);
        assert_eq!(machine.debounce_deadline(), Some(t0 + ms(1650)));
    }

    #[test]
    fn test_success_settles_saved() {
        let t0 = Instant::now();
        let mut machine = hydrated(t0);
        machine.handle(SyncEvent::MutationOccurred { fingerprint: fp("F1") }, t0);
        machine.handle(SyncEvent::DebounceExpired { fingerprint: fp("F1") }, t0 + ms(800));
        machine.handle(
            SyncEvent::SaveSucceeded {
                attempted: fp("F1"),
                current: fp("F1"),
                saved_at: 42,
                changed_sections: vec!["hero".into()],
            },
            t0 + ms(900),
        );

        let state = machine.state();
        assert_eq!(state.status, PersistenceStatus::Saved);
        assert!(!state.pending_changes);
        assert_eq!(state.retry_count, 0);
        assert_eq!(state.last_saved_at, Some(42));
        assert_eq!(state.changed_sections, vec!["hero".to_string()]);
        assert_eq!(machine.acknowledged(), Some(&fp("F1")));
        assert_eq!(machine.known_remote(), Some(&fp("F1")));
    }

    #[test]
    fn test_failures_back_off_linearly_then_error() {
        let t0 = Instant::now();
        let mut machine = hydrated(t0);
        machine.handle(SyncEvent::MutationOccurred { fingerprint: fp("F1") }, t0);
        machine.handle(SyncEvent::DebounceExpired { fingerprint: fp("F1") }, t0);

        let mut now = t0;
        for attempt in 1..=3u32 {
            machine.handle(
                SyncEvent::SaveFailed {
                    attempted: fp("F1"),
                    current: fp("F1"),
                    message: "offline".into(),
                    retryable: true,
                },
                now,
            );
            assert_eq!(machine.state().status, PersistenceStatus::Retrying);
            assert_eq!(machine.state().retry_count, attempt);
            assert_eq!(machine.retry_deadline(), Some(now + ms(1_000) * attempt));

            now += ms(1_000) * attempt;
            let effects = machine.handle(SyncEvent::RetryDue { fingerprint: fp("F1") }, now);
            assert_eq!(
                effects,
                vec![Effect::StartSave { fingerprint: fp("F1"), attempt }]
            );
        }

        machine.handle(
            SyncEvent::SaveFailed {
                attempted: fp("F1"),
                current: fp("F1"),
                message: "offline".into(),
                retryable: true,
            },
            now,
        );
        let state = machine.state();
        assert_eq!(state.status, PersistenceStatus::Error);
        assert!(state.pending_changes);
        assert_eq!(state.retry_count, 4);
        assert_eq!(state.last_error.as_deref(), Some("offline"));
        assert!(machine.next_deadline().is_none());
    }

    #[test]
    fn test_success_after_two_failures_resets_retry_count() {
        let t0 = Instant::now();
        let mut machine = hydrated(t0);
        machine.handle(SyncEvent::MutationOccurred { fingerprint: fp("F1") }, t0);
        machine.handle(SyncEvent::DebounceExpired { fingerprint: fp("F1") }, t0);

        let failed = || SyncEvent::SaveFailed {
            attempted: fp("F1"),
            current: fp("F1"),
            message: "offline".into(),
            retryable: true,
        };

        machine.handle(failed(), t0);
        assert_eq!(machine.retry_deadline(), Some(t0 + ms(1_000)));
        machine.handle(SyncEvent::RetryDue { fingerprint: fp("F1") }, t0 + ms(1_000));

        machine.handle(failed(), t0 + ms(1_000));
        assert_eq!(machine.state().retry_count, 2);
        assert_eq!(machine.retry_deadline(), Some(t0 + ms(3_000)));
        let effects = machine.handle(SyncEvent::RetryDue { fingerprint: fp("F1") }, t0 + ms(3_000));
        assert_eq!(
            effects,
            vec![Effect::StartSave { fingerprint: fp("F1"), attempt: 2 }]
        );
        assert_eq!(machine.state().status, PersistenceStatus::Retrying);

        machine.handle(
            SyncEvent::SaveSucceeded {
                attempted: fp("F1"),
                current: fp("F1"),
                saved_at: 7,
                changed_sections: vec!["hero".into()],
            },
            t0 + ms(3_100),
        );
        let state = machine.state();
        assert_eq!(state.status, PersistenceStatus::Saved);
        assert_eq!(state.retry_count, 0);
        assert_eq!(state.last_error, None);
        assert!(!state.pending_changes);
        assert!(machine.next_deadline().is_none());
    }

    #[test]
    fn test_permanent_failure_skips_retries() {
        let t0 = Instant::now();
        let mut machine = hydrated(t0);
        machine.handle(SyncEvent::MutationOccurred { fingerprint: fp("F1") }, t0);
        machine.handle(SyncEvent::DebounceExpired { fingerprint: fp("F1") }, t0);
        machine.handle(
            SyncEvent::SaveFailed {
                attempted: fp("F1"),
                current: fp("F1"),
                message: "invalid payload".into(),
                retryable: false,
            },
            t0,
        );
        assert_eq!(machine.state().status, PersistenceStatus::Error);
        assert!(machine.retry_deadline().is_none());
        assert!(machine.state().pending_changes);
    }

    #[test]
    fn test_mutation_resumes_from_error() {
        let t0 = Instant::now();
        let mut machine = hydrated(t0);
        machine.handle(SyncEvent::MutationOccurred { fingerprint: fp("F1") }, t0);
        machine.handle(SyncEvent::DebounceExpired { fingerprint: fp("F1") }, t0);
        machine.handle(
            SyncEvent::SaveFailed {
                attempted: fp("F1"),
                current: fp("F1"),
                message: "bad".into(),
                retryable: false,
            },
            t0,
        );

        machine.handle(SyncEvent::MutationOccurred { fingerprint: fp("F2") }, t0 + ms(10));
        assert_eq!(machine.state().status, PersistenceStatus::Draft);
        assert_eq!(machine.state().retry_count, 0);
        assert!(machine.debounce_deadline().is_some());
    }

    #[test]
    fn test_retry_requested_restarts_from_error() {
        let t0 = Instant::now();
        let mut machine = hydrated(t0);
        machine.handle(SyncEvent::MutationOccurred { fingerprint: fp("F1") }, t0);
        machine.handle(SyncEvent::DebounceExpired { fingerprint: fp("F1") }, t0);
        machine.handle(
            SyncEvent::SaveFailed {
                attempted: fp("F1"),
                current: fp("F1"),
                message: "bad".into(),
                retryable: false,
            },
            t0,
        );

        let effects = machine.handle(SyncEvent::RetryRequested { fingerprint: fp("F1") }, t0);
        assert_eq!(
            effects,
            vec![Effect::StartSave { fingerprint: fp("F1"), attempt: 0 }]
        );
        assert_eq!(machine.state().status, PersistenceStatus::Saving);
    }

    #[test]
    fn test_final_failure_with_newer_queue_starts_fresh_cycle() {
        let t0 = Instant::now();
        let config = EngineConfig {
            max_retries: 0,
            ..EngineConfig::default()
        };
        let mut machine = SyncMachine::new(&config);
        machine.handle(SyncEvent::Hydrated { fingerprint: fp("F0") }, t0);
        machine.handle(SyncEvent::MutationOccurred { fingerprint: fp("F1") }, t0);
        machine.handle(SyncEvent::DebounceExpired { fingerprint: fp("F1") }, t0);
        machine.handle(SyncEvent::MutationOccurred { fingerprint: fp("F2") }, t0);
        machine.handle(SyncEvent::DebounceExpired { fingerprint: fp("F2") }, t0);

        let effects = machine.handle(
            SyncEvent::SaveFailed {
                attempted: fp("F1"),
                current: fp("F2"),
                message: "offline".into(),
                retryable: true,
            },
            t0,
        );
        assert_eq!(
            effects,
            vec![Effect::StartSave { fingerprint: fp("F2"), attempt: 0 }]
        );
    }

    #[test]
    fn test_remote_replace_clears_pending() {
        let t0 = Instant::now();
        let mut machine = hydrated(t0);
        machine.handle(SyncEvent::MutationOccurred { fingerprint: fp("F1") }, t0);

        machine.handle(SyncEvent::RemoteReplaced { fingerprint: fp("R1") }, t0);
        assert_eq!(machine.state().status, PersistenceStatus::Idle);
        assert!(!machine.state().pending_changes);
        assert_eq!(machine.acknowledged(), Some(&fp("R1")));
        assert!(machine.debounce_deadline().is_none());
    }

    #[test]
    fn test_hydrate_failure_surfaces_error() {
        let t0 = Instant::now();
        let mut machine = SyncMachine::new(&EngineConfig::default());
        machine.handle(
            SyncEvent::HydrateFailed { message: "initial load failed".into() },
            t0,
        );
        assert_eq!(machine.state().status, PersistenceStatus::Error);
        assert!(machine.acknowledged().is_none());

        // Any edit now diverges from the (unknown) remote state
        machine.handle(SyncEvent::MutationOccurred { fingerprint: fp("F1") }, t0);
        assert_eq!(machine.state().status, PersistenceStatus::Draft);
    }

    #[test]
    fn test_rollback_events() {
        let t0 = Instant::now();
        let mut machine = hydrated(t0);
        machine.handle(SyncEvent::MutationOccurred { fingerprint: fp("F1") }, t0);

        let effects = machine.handle(SyncEvent::RolledBack { fingerprint: fp("V1") }, t0);
        assert_eq!(effects, vec![Effect::RefreshHistory]);
        assert!(!machine.state().pending_changes);
        assert_eq!(machine.acknowledged(), Some(&fp("V1")));

        machine.handle(SyncEvent::RollbackFailed { message: "unknown version".into() }, t0);
        assert_eq!(machine.state().status, PersistenceStatus::Error);
        assert_eq!(machine.state().last_error.as_deref(), Some("unknown version"));
    }
}
