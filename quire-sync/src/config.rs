//! Engine configuration.

use quire_core::ContentDocument;
use serde::Deserialize;
use std::time::Duration;

/// What a poll does when the remote changed while local edits are pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PollPolicy {
    /// Remote always replaces local, pending edits included.
    #[default]
    LastFetchWins,
    /// Replace only when no local edits are pending.
    PreserveLocalEdits,
}

/// Sync engine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Quiet window before a burst of edits is saved (default: 800ms)
    pub debounce_ms: u64,
    /// Retry delay step; attempt N waits `N * retry_base_delay_ms` (default: 1s)
    pub retry_base_delay_ms: u64,
    /// Retries after the first failed attempt before giving up (default: 3)
    pub max_retries: u32,
    /// Remote poll interval (default: 5s)
    pub poll_interval_ms: u64,
    /// Versions kept by the history client (default: 25)
    pub history_limit: usize,
    pub poll_policy: PollPolicy,
    /// Used when neither the remote store nor the local cache has a document
    pub defaults: ContentDocument,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 800,
            retry_base_delay_ms: 1_000,
            max_retries: 3,
            poll_interval_ms: 5_000,
            history_limit: 25,
            poll_policy: PollPolicy::LastFetchWins,
            defaults: ContentDocument::default(),
        }
    }
}

impl EngineConfig {
    /// Config for testing (short windows, same retry budget).
    pub fn for_testing() -> Self {
        Self {
            debounce_ms: 50,
            retry_base_delay_ms: 10,
            max_retries: 3,
            poll_interval_ms: 200,
            history_limit: 25,
            poll_policy: PollPolicy::LastFetchWins,
            defaults: ContentDocument::default(),
        }
    }

    /// Parse from JSON; missing fields keep their defaults.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
