//! Shared error types for the services crate.

use thiserror::Error;

use room_core::TimerError;
use room_core::model::{SessionStateError, SnapshotError, StageKey};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted by `RoomSession`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionError {
    #[error("time is up: reset the timer to keep playing")]
    Locked,
    #[error("already at the {0} stage")]
    Boundary(&'static str),
    #[error("stage {key} is solved by choosing a hotspot, not by running code")]
    NotCodeStage { key: StageKey },
    #[error("stage {key} has no hotspots")]
    NotInteractionStage { key: StageKey },
    #[error("the session changed while the program was running; run it again")]
    Superseded,
    #[error(transparent)]
    State(SessionStateError),
    #[error(transparent)]
    Timer(#[from] TimerError),
}

impl From<SessionStateError> for SessionError {
    fn from(err: SessionStateError) -> Self {
        match err {
            SessionStateError::Locked => Self::Locked,
            SessionStateError::NotCodeStage { key } => Self::NotCodeStage { key },
            SessionStateError::Timer(timer) => Self::Timer(timer),
            other => Self::State(other),
        }
    }
}

/// Errors emitted by `ProgressSync`. None of them change the live session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SyncError {
    #[error("no learner identity: progress sync is unavailable in guest mode")]
    InvalidIdentity,
    #[error("time is up: reset the timer before loading progress")]
    Locked,
    #[error("progress store unreachable: {0}")]
    Transport(String),
    #[error("saved progress is corrupt: {0}")]
    CorruptRecord(String),
    #[error("progress store rejected the request: {0}")]
    Rejected(String),
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Connection(message) => Self::Transport(message),
            StorageError::Corrupt(message) | StorageError::Serialization(message) => {
                Self::CorruptRecord(message)
            }
            other => Self::Rejected(other.to_string()),
        }
    }
}

impl From<SnapshotError> for SyncError {
    fn from(err: SnapshotError) -> Self {
        Self::CorruptRecord(err.to_string())
    }
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Session(#[from] SessionError),
}
