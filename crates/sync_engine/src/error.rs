//! Errors raised by the sync engine.
//!
//! Gateway failures are classified by the [`ErrorKind`] the gateway reports:
//!
//! - [`Network`] is transient. The session goes offline and the operation is
//!   queued; local-first operations never return it to their caller.
//! - [`Validation`] is permanent. The optimistic write is rolled back and the
//!   error is surfaced.
//! - [`NotFound`] counts as success for deletes.
//! - [`Other`] is anything the gateway could not classify. It is handled like
//!   a validation failure.
//!
//!  [`Network`]: ErrorKind::Network
//!  [`Validation`]: ErrorKind::Validation
//!  [`NotFound`]: ErrorKind::NotFound
//!  [`Other`]: ErrorKind::Other
use ledger::LedgerError;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Validation,
    NotFound,
    Other,
}

/// Failure reported by a [`RemoteGateway`](crate::RemoteGateway) call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub message: String,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Other, message)
    }

    #[must_use]
    pub fn is_network(&self) -> bool {
        self.kind == ErrorKind::Network
    }
}

/// Sync engine custom errors.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Network unavailable: {0}")]
    Network(String),
    #[error("Rejected by the remote store: {0}")]
    Validation(String),
    #[error("\"{0}\" not found remotely")]
    NotFound(String),
    #[error("Remote store error: {0}")]
    Remote(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("Invalid snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
    #[error("Session is closed")]
    SessionClosed,
    #[error("User is not authenticated")]
    Unauthenticated,
    #[error("Snapshot belongs to another user: {0}")]
    SnapshotUserMismatch(String),
}

impl From<GatewayError> for SyncError {
    fn from(err: GatewayError) -> Self {
        match err.kind {
            ErrorKind::Network => Self::Network(err.message),
            ErrorKind::Validation => Self::Validation(err.message),
            ErrorKind::NotFound => Self::NotFound(err.message),
            ErrorKind::Other => Self::Remote(err.message),
        }
    }
}

impl PartialEq for SyncError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Network(a), Self::Network(b)) => a == b,
            (Self::Validation(a), Self::Validation(b)) => a == b,
            (Self::NotFound(a), Self::NotFound(b)) => a == b,
            (Self::Remote(a), Self::Remote(b)) => a == b,
            (Self::Ledger(a), Self::Ledger(b)) => a == b,
            (Self::Snapshot(a), Self::Snapshot(b)) => a.to_string() == b.to_string(),
            (Self::SessionClosed, Self::SessionClosed) => true,
            (Self::Unauthenticated, Self::Unauthenticated) => true,
            (Self::SnapshotUserMismatch(a), Self::SnapshotUserMismatch(b)) => a == b,
            _ => false,
        }
    }
}
