//! The module contains the errors the ledger can throw.
//!
//! Every variant is a *validation* failure: the ledger never talks to the
//! network, so anything it rejects is permanent and must be surfaced to the
//! caller before an optimistic write happens.
//!
//! - [`InvalidAmount`] thrown when a monetary value is malformed or out of range.
//! - [`KeyNotFound`] thrown when an entity is not in the store.
//! - [`InvalidTransfer`] thrown when a transfer would break the pairing rules.
//!
//!  [`InvalidAmount`]: LedgerError::InvalidAmount
//!  [`KeyNotFound`]: LedgerError::KeyNotFound
//!  [`InvalidTransfer`]: LedgerError::InvalidTransfer
use thiserror::Error;

/// Ledger custom errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid month: {0}")]
    InvalidMonth(String),
    #[error("Invalid name: {0}")]
    InvalidName(String),
    #[error("\"{0}\" key not found!")]
    KeyNotFound(String),
    #[error("\"{0}\" already present!")]
    ExistingKey(String),
    #[error("Invalid transfer: {0}")]
    InvalidTransfer(String),
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    #[error("Unsupported snapshot version {0}")]
    UnsupportedSnapshot(u32),
}
