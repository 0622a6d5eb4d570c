//! # quire-sync — autosave and sync engine for content documents
//!
//! Keeps an in-memory [`ContentDocument`](quire_core::ContentDocument) in
//! step with a remote authoritative store: debounced single-flight saves,
//! linear-backoff retries, background polling for other sessions' changes,
//! version history and per-section rollback.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────┐   write-through   ┌────────────┐
//!  edits ───────► │DocumentStore │ ────────────────► │ LocalCache │
//!                 └──────┬───────┘                   └────────────┘
//!                        │ fingerprint
//!                        ▼
//!                 ┌──────────────┐  StartSave   ┌──────────────┐
//!  timers ──────► │ SyncMachine  │ ───────────► │ RemoteStore  │
//!                 │ (pure FSM)   │ ◄─────────── │ HTTP/memory  │
//!                 └──────┬───────┘  Succeeded/  └──────┬───────┘
//!                        │          Failed             │ read
//!                        ▼                             ▼
//!               watch<PersistenceState>         RemotePoller / HistoryClient
//! ```
//!
//! ## Modules
//!
//! - [`machine`] — persistence state machine: debounce, single-flight, retry
//! - [`engine`] — [`SyncEngine`], which owns every component and does the I/O
//! - [`handle`] — run the engine as a task behind an [`EngineHandle`]
//! - [`store`] — the live document with write-through caching
//! - [`cache`] — versioned, checksummed local snapshots
//! - [`remote`] — [`RemoteStore`] trait, HTTP and in-memory implementations
//! - [`poller`] — remote change detection and the overwrite policy
//! - [`history`] — version list and rollback
//! - [`config`] — [`EngineConfig`]

pub mod cache;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod handle;
pub mod history;
pub mod machine;
pub mod poller;
pub mod remote;
pub mod status;
pub mod store;

pub use cache::{
    decode_snapshot, encode_snapshot, CacheEnvelope, CacheError, FileCache, LocalCache,
    MemoryCache, CACHE_SCHEMA_VERSION,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, PollPolicy};
pub use engine::{SyncEngine, Teardown};
pub use error::SyncError;
pub use handle::{Command, EngineHandle};
pub use history::HistoryClient;
pub use machine::{Effect, SyncEvent, SyncMachine};
pub use poller::{PollDecision, PollOutcome, PollSkip, RemotePoller};
pub use remote::{
    Fault, HttpRemote, HttpRemoteConfig, MemoryRemote, RemoteError, RemoteStore, SaveReceipt,
    SaveRequest,
};
pub use status::{PersistenceState, PersistenceStatus};
pub use store::DocumentStore;
