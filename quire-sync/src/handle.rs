//! Running the engine as a task.
//!
//! [`SyncEngine::spawn`] moves the engine onto its own task and hands back
//! an [`EngineHandle`]. The run loop multiplexes three sources:
//!
//! ```text
//!   EngineHandle ──► mpsc<Command> ──┐
//!   JoinSet (saves, polls, history) ─┼──► select! ──► SyncEngine
//!   sleep(next deadline) ────────────┘                    │
//!                                                         ▼
//!   EngineHandle ◄──────────── watch<PersistenceState> ◄──┘
//! ```
//!
//! Dropping every handle shuts the engine down.

use quire_core::{ContentDocument, VersionEntry};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::engine::{SyncEngine, Teardown};
use crate::error::SyncError;
use crate::poller::PollOutcome;
use crate::remote::RemoteStore;
use crate::status::{PersistenceState, PersistenceStatus};

const COMMAND_BUFFER: usize = 256;

pub enum Command {
    PatchSection { section: String, partial: Value },
    ReplaceSection { section: String, value: Value },
    RetryNow,
    SetForeground(bool),
    PollNow(oneshot::Sender<PollOutcome>),
    Snapshot(oneshot::Sender<ContentDocument>),
    RefreshHistory(oneshot::Sender<Result<Vec<VersionEntry>, SyncError>>),
    Rollback {
        version_id: String,
        reply: oneshot::Sender<Result<(), SyncError>>,
    },
    Shutdown(oneshot::Sender<Teardown>),
}

/// Cloneable front door to a spawned engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<PersistenceState>,
}

impl EngineHandle {
    pub fn state(&self) -> PersistenceState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PersistenceState> {
        self.state.clone()
    }

    /// Wait until the published status satisfies `pred`.
    pub async fn wait_for(
        &mut self,
        pred: impl FnMut(&PersistenceState) -> bool,
    ) -> Result<PersistenceState, SyncError> {
        self.state
            .wait_for(pred)
            .await
            .map(|state| state.clone())
            .map_err(|_| SyncError::ShutDown)
    }

    pub async fn patch_section(&self, section: &str, partial: Value) -> Result<(), SyncError> {
        self.send(Command::PatchSection {
            section: section.to_string(),
            partial,
        })
        .await
    }

    pub async fn replace_section(&self, section: &str, value: Value) -> Result<(), SyncError> {
        self.send(Command::ReplaceSection {
            section: section.to_string(),
            value,
        })
        .await
    }

    pub async fn retry_now(&self) -> Result<(), SyncError> {
        self.send(Command::RetryNow).await
    }

    pub async fn set_foreground(&self, foreground: bool) -> Result<(), SyncError> {
        self.send(Command::SetForeground(foreground)).await
    }

    pub async fn poll_now(&self) -> Result<PollOutcome, SyncError> {
        self.request(Command::PollNow).await
    }

    pub async fn snapshot(&self) -> Result<ContentDocument, SyncError> {
        self.request(Command::Snapshot).await
    }

    pub async fn refresh_history(&self) -> Result<Vec<VersionEntry>, SyncError> {
        self.request(Command::RefreshHistory).await?
    }

    pub async fn rollback_section(&self, version_id: &str) -> Result<(), SyncError> {
        let version_id = version_id.to_string();
        self.request(|reply| Command::Rollback { version_id, reply })
            .await?
    }

    pub async fn shutdown(&self) -> Result<Teardown, SyncError> {
        self.request(Command::Shutdown).await
    }

    async fn send(&self, command: Command) -> Result<(), SyncError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SyncError::ShutDown)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx)).await?;
        rx.await.map_err(|_| SyncError::ShutDown)
    }
}

impl<R: RemoteStore> SyncEngine<R> {
    /// Move the engine onto its own task. Hydrates first if `start` has not
    /// been called yet.
    pub fn spawn(mut self) -> (EngineHandle, JoinHandle<Teardown>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let handle = EngineHandle {
            commands: tx,
            state: self.subscribe(),
        };
        let join = tokio::spawn(async move { self.run(rx).await });
        (handle, join)
    }

    /// Drive the engine until shutdown or until every sender is dropped.
    pub async fn run(&mut self, mut commands: mpsc::Receiver<Command>) -> Teardown {
        if self.state().status == PersistenceStatus::Hydrating {
            self.start().await;
        }

        loop {
            let wait = self
                .next_deadline()
                .map(|at| at.saturating_duration_since(self.clock_now()));

            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if let Some(teardown) = self.execute(command).await {
                            return teardown;
                        }
                    }
                    None => return self.shutdown(),
                },
                Some(joined) = self.join_next(), if self.pending_tasks() > 0 => {
                    self.on_joined(joined);
                }
                _ = sleep_for(wait) => {}
            }

            self.tick();
        }
    }

    /// Apply one command. Returns the teardown report once the engine has
    /// shut down.
    async fn execute(&mut self, command: Command) -> Option<Teardown> {
        match command {
            Command::PatchSection { section, partial } => self.patch_section(&section, partial),
            Command::ReplaceSection { section, value } => self.replace_section(&section, value),
            Command::RetryNow => self.retry_now(),
            Command::SetForeground(foreground) => self.set_foreground(foreground),
            Command::PollNow(reply) => {
                let _ = reply.send(self.poll_once().await);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.document().clone());
            }
            Command::RefreshHistory(reply) => {
                let _ = reply.send(self.refresh_history().await);
            }
            Command::Rollback { version_id, reply } => {
                let _ = reply.send(self.rollback_section(&version_id).await);
            }
            Command::Shutdown(reply) => {
                let teardown = self.shutdown();
                let _ = reply.send(teardown);
                return Some(teardown);
            }
        }
        None
    }
}

async fn sleep_for(wait: Option<Duration>) {
    match wait {
        Some(wait) => tokio::time::sleep(wait).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::config::EngineConfig;
    use crate::remote::MemoryRemote;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_spawned_engine_saves_after_debounce() {
        let remote = Arc::new(MemoryRemote::with_document(
            ContentDocument::new().with_section("hero", json!({"title": "F0"})),
        ));
        let engine = SyncEngine::new(
            EngineConfig::default(),
            remote.clone(),
            Box::new(MemoryCache::new()),
        );
        let (mut handle, join) = engine.spawn();

        handle
            .wait_for(|s| s.status == PersistenceStatus::Idle)
            .await
            .unwrap();
        handle.patch_section("hero", json!({"title": "F1"})).await.unwrap();

        let state = handle
            .wait_for(|s| s.status == PersistenceStatus::Saved)
            .await
            .unwrap();
        assert!(!state.pending_changes);
        assert_eq!(state.changed_sections, ["hero"]);
        assert_eq!(remote.document().section("hero"), Some(&json!({"title": "F1"})));
        assert_eq!(remote.saves_started(), 1);

        let teardown = handle.shutdown().await.unwrap();
        assert!(!teardown.unsaved_changes);
        assert_eq!(join.await.unwrap(), teardown);
        assert_eq!(
            handle.patch_section("hero", json!({})).await,
            Err(SyncError::ShutDown)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handles_shuts_down() {
        let engine = SyncEngine::new(
            EngineConfig::for_testing(),
            Arc::new(MemoryRemote::new()),
            Box::new(MemoryCache::new()),
        );
        let (handle, join) = engine.spawn();
        handle.patch_section("hero", json!({"title": "never saved"})).await.unwrap();
        drop(handle);

        let teardown = join.await.unwrap();
        assert!(teardown.unsaved_changes);
    }
}
