use thiserror::Error;

use crate::api::ApiError;
use crate::storage::DatabaseError;

/// Coarse classification of a sync failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network, timeout, or error status from the server
    Transport,
    /// The server answered with a payload that does not decode
    Parse,
    /// A local storage write or read failed
    Constraint,
    /// Credentials missing or rejected
    Auth,
    /// Another sync cycle holds the engine
    Busy,
}

/// Errors surfaced by the sync engine.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("No login id or password configured")]
    MissingCredentials,

    #[error("Login rejected for '{0}'")]
    LoginRejected(String),

    #[error("A sync cycle is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::MissingCredentials | SyncError::LoginRejected(_) => ErrorKind::Auth,
            SyncError::AlreadyRunning => ErrorKind::Busy,
            SyncError::Api(e) if e.is_auth() => ErrorKind::Auth,
            SyncError::Api(ApiError::Parse(_)) => ErrorKind::Parse,
            SyncError::Api(_) => ErrorKind::Transport,
            SyncError::Database(_) => ErrorKind::Constraint,
        }
    }
}
