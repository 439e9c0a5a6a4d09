use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status codes a server endpoint reports when it rejects a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerStatus {
    /// The server revision moved past the revision the client based its changes on.
    StaleRevision,
    /// A pushed insert collided with a row the server already holds.
    DuplicateEntry,
    /// The client presented a revision the server never issued.
    UnknownRevision,
    /// A change arrived for a table the sender is not allowed to write.
    DirectionViolation,
}

impl ServerStatus {
    /// Statuses that mean the server advanced underneath the client; a fresh
    /// cycle that re-reads the revision is expected to succeed.
    pub fn is_recoverable(self) -> bool {
        matches!(self, ServerStatus::StaleRevision | ServerStatus::DuplicateEntry)
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerStatus::StaleRevision => "stale revision",
            ServerStatus::DuplicateEntry => "duplicate entry",
            ServerStatus::UnknownRevision => "unknown revision",
            ServerStatus::DirectionViolation => "direction violation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("table {table} resolves conflicts with FIRE_EVENT but no conflict listener is registered")]
    MissingListener { table: String },

    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization conflicts, busy databases, dropped connections.
    #[error("transient storage error: {0}")]
    Transient(String),

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("server rejected request ({status}): {message}")]
    Server { status: ServerStatus, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("synchronization failed after {attempts} attempt(s): {source}")]
    SyncFailed {
        attempts: u32,
        status: Option<ServerStatus>,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn server(status: ServerStatus, message: impl Into<String>) -> Self {
        Error::Server { status, message: message.into() }
    }

    /// Configuration errors are never retried.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_) | Error::MissingListener { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }

    /// The server status that makes restarting the whole cycle worthwhile.
    pub fn recoverable_status(&self) -> Option<ServerStatus> {
        match self {
            Error::Server { status, .. } if status.is_recoverable() => Some(*status),
            _ => None,
        }
    }

    /// Status carried by this error, recoverable or not.
    pub fn server_status(&self) -> Option<ServerStatus> {
        match self {
            Error::Server { status, .. } => Some(*status),
            Error::SyncFailed { status, .. } => *status,
            _ => None,
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                Error::Transient(e.to_string())
            }
            Some(ErrorCode::ConstraintViolation) => Error::Integrity(e.to_string()),
            _ => Error::Storage(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
