//! Trip store error types.

use crate::domain::DomainError;
use crate::ledger::LedgerError;

/// Errors returned by a [`TripStore`](super::TripStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} {id} already exists")]
    AlreadyExists { kind: &'static str, id: String },

    /// A mutation was rejected; the record is unchanged.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The resulting record failed validation; the record is unchanged.
    #[error("invalid record: {0}")]
    Invalid(#[from] DomainError),

    /// The backing store could not be reached.
    #[error("store unavailable: {message}")]
    Unavailable { message: String },

    #[error("snapshot error: {message}")]
    Snapshot { message: String },
}

impl StoreError {
    pub(crate) fn trip_not_found(id: impl ToString) -> Self {
        StoreError::NotFound {
            kind: "trip",
            id: id.to_string(),
        }
    }

    pub(crate) fn group_not_found(id: impl ToString) -> Self {
        StoreError::NotFound {
            kind: "trip group",
            id: id.to_string(),
        }
    }
}
