//! Matcher error types.

use crate::domain::TripId;
use crate::ledger::LedgerError;
use crate::oracle::OracleError;
use crate::store::StoreError;

/// Errors surfaced by the event entry points.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    /// The candidate query (or the distance cutoff) left nothing to compare.
    /// The trip has been marked unmatched.
    #[error("no candidates found for trip {0}")]
    NoCandidatesFound(TripId),

    /// Distance lookups failed. Raised before any relation was written.
    #[error("distance oracle unavailable: {0}")]
    OracleUnavailable(#[from] OracleError),

    /// A hold or relation changed between read and write, even after
    /// re-reading.
    #[error("reservation state changed under trip {0}")]
    StaleReservationState(TripId),

    #[error("trip {0} not found")]
    TripNotFound(TripId),

    #[error("store error: {0}")]
    Store(StoreError),
}

impl MatchError {
    /// Whether redelivering the event may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            MatchError::OracleUnavailable(_) | MatchError::StaleReservationState(_) => true,
            MatchError::Store(StoreError::Unavailable { .. }) => true,
            _ => false,
        }
    }
}

impl From<StoreError> for MatchError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Ledger(LedgerError::Stale { trip_id, .. })
            | StoreError::Ledger(LedgerError::ReservingRelation { trip_id, .. }) => {
                MatchError::StaleReservationState(trip_id)
            }
            other => MatchError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> TripId {
        TripId::new("t1").unwrap()
    }

    #[test]
    fn error_display() {
        assert_eq!(
            MatchError::NoCandidatesFound(id()).to_string(),
            "no candidates found for trip t1"
        );
        assert_eq!(
            MatchError::StaleReservationState(id()).to_string(),
            "reservation state changed under trip t1"
        );
        assert_eq!(
            MatchError::from(OracleError::RateLimited).to_string(),
            "distance oracle unavailable: rate limited by route matrix API"
        );
    }

    #[test]
    fn stale_ledger_errors_become_stale_reservation_state() {
        let e = MatchError::from(StoreError::Ledger(LedgerError::Stale {
            trip_id: id(),
            reason: "already held by another trip",
        }));
        assert!(matches!(e, MatchError::StaleReservationState(_)));
        assert!(e.is_retryable());
    }

    #[test]
    fn retry_policy() {
        assert!(!MatchError::NoCandidatesFound(id()).is_retryable());
        assert!(!MatchError::TripNotFound(id()).is_retryable());
        assert!(MatchError::OracleUnavailable(OracleError::Unauthorized).is_retryable());
        assert!(
            MatchError::from(StoreError::Unavailable {
                message: "down".to_string()
            })
            .is_retryable()
        );
        assert!(!MatchError::from(StoreError::trip_not_found("x")).is_retryable());
    }
}
