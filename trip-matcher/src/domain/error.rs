//! Validation errors for domain records.

use super::ids::{InvalidId, TripId};

/// A record failed validation at the store boundary.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DomainError {
    #[error(transparent)]
    Id(#[from] InvalidId),

    #[error("coordinate out of range: {lat},{lng}")]
    InvalidCoordinate { lat: f64, lng: f64 },

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("seat count must be between 1 and 4, got {0}")]
    InvalidSeatCount(u8),

    #[error("time window ends before it starts")]
    InvalidWindow,

    #[error("relation to {0} recorded more than once")]
    DuplicateRelation(TripId),

    #[error("relation to {0} recorded as both matched and potential")]
    ConflictingRelation(TripId),

    #[error("trip cannot relate to itself")]
    SelfRelation,

    #[error("group seat total {recorded} does not match members ({actual})")]
    SeatTotalMismatch { recorded: u8, actual: u8 },

    #[error("group holds {0} seats, over capacity")]
    OverCapacity(u8),

    #[error("group has no members")]
    EmptyGroup,
}
