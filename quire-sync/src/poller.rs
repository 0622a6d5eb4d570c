//! Remote poll scheduling and the overwrite decision.
//!
//! The poller only decides; the engine performs the fetch and applies the
//! result. Default policy is last-fetch-wins: a changed remote document
//! replaces the local one even when local edits are pending. That trades
//! the occasional lost concurrent edit for other sessions' changes showing
//! up quickly.

use quire_core::Fingerprint;
use std::time::{Duration, Instant};

use crate::config::PollPolicy;

/// Why a poll tick did not fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollSkip {
    /// Surface is backgrounded
    Background,
    /// A save is in flight; its acknowledgement is about to move the
    /// known remote fingerprint
    SaveInFlight,
    /// The previous poll has not returned yet
    PollInFlight,
}

/// What to do with a fetched remote document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    /// Fingerprint matches the last known remote one
    Unchanged,
    /// Replace the local document wholesale
    Replace,
    /// Remote changed but local edits are pending and the policy keeps them
    KeepLocal,
}

/// Outcome of one poll, as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Skipped(PollSkip),
    Unchanged,
    Replaced { fingerprint: Fingerprint },
    KeptLocal,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct RemotePoller {
    interval: Duration,
    policy: PollPolicy,
    next_at: Option<Instant>,
    foreground: bool,
    in_flight: bool,
}

impl RemotePoller {
    pub fn new(interval: Duration, policy: PollPolicy) -> Self {
        Self {
            interval,
            policy,
            next_at: None,
            foreground: true,
            in_flight: false,
        }
    }

    pub fn is_foreground(&self) -> bool {
        self.foreground
    }

    pub fn set_foreground(&mut self, foreground: bool) {
        self.foreground = foreground;
    }

    pub fn set_in_flight(&mut self, in_flight: bool) {
        self.in_flight = in_flight;
    }

    /// Schedule the next tick one interval from `now`.
    pub fn arm(&mut self, now: Instant) {
        self.next_at = Some(now + self.interval);
    }

    pub fn disarm(&mut self) {
        self.next_at = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.next_at
    }

    pub fn due(&self, now: Instant) -> bool {
        self.next_at.is_some_and(|at| at <= now)
    }

    /// Whether a tick may fetch right now.
    pub fn check(&self, save_in_flight: bool) -> Result<(), PollSkip> {
        if !self.foreground {
            return Err(PollSkip::Background);
        }
        if save_in_flight {
            return Err(PollSkip::SaveInFlight);
        }
        if self.in_flight {
            return Err(PollSkip::PollInFlight);
        }
        Ok(())
    }

    /// Decide what a fetched document with `remote` fingerprint means.
    pub fn decide(
        &self,
        remote: &Fingerprint,
        known_remote: Option<&Fingerprint>,
        pending_changes: bool,
    ) -> PollDecision {
        if known_remote == Some(remote) {
            return PollDecision::Unchanged;
        }
        match self.policy {
            PollPolicy::LastFetchWins => PollDecision::Replace,
            PollPolicy::PreserveLocalEdits if pending_changes => PollDecision::KeepLocal,
            PollPolicy::PreserveLocalEdits => PollDecision::Replace,
        }
    }
}
