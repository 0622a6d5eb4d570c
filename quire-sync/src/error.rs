use thiserror::Error;

use crate::remote::RemoteError;

/// Errors returned to callers of the engine.
///
/// Every failure is also recorded in `PersistenceState::last_error`; these
/// exist so request/response style calls (rollback, history) can report
/// inline as well.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("a save is in flight, try again once it completes")]
    SaveInFlight,
    #[error("sync engine has shut down")]
    ShutDown,
}
