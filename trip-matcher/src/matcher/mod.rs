//! Trip matching.
//!
//! A new trip is compared against every trip it could share a ride with.
//! Each pair ends up recorded on both sides as matched (both radii cover
//! the road distances with room to spare, nothing blocks them) or potential
//! (close, but blocked by geometry, a hold, or a paid group it cannot
//! join).
//!
//! Once a trip pays it is placed in a group. While a group has a single
//! member, that member holds its closest committed counterpart so the
//! group can fill. Edits to radii or seats re-run the affected decisions.

mod allocator;
mod classify;
mod config;
mod engine;
mod error;
mod reconcile;
mod reservation;
mod tiebreak;

#[cfg(test)]
mod fixtures;


pub use allocator::{AllocationOutcome, evaluate_admission};
pub use classify::{
    Admission, ClassifyContext, GroupContext, MatchOutcome, PairWrites, PeerView, classify,
    relation_writes,
};
pub use config::MatcherConfig;
pub use engine::{EventOutcome, MatchEngine, MatchReport};
pub use error::MatchError;
pub use reconcile::{ReconcileReport, affects_matching};
pub use reservation::HoldOutcome;
pub use tiebreak::Tiebreaker;
