//! Classification of one (newcomer, candidate) pair.
//!
//! [`classify`] is a pure function of the two records, their distances, and
//! whatever the caller fetched about the candidate's holder or group. The
//! outcome is turned into record mutations by [`relation_writes`]; nothing
//! here touches the store.

use crate::domain::{
    MatchedRelation, PotentialGroupMember, PotentialRelation, RelationSnapshot, Trip, TripGroup,
    TripId,
};
use crate::geometry::{PairDistances, Radii, proper_match, proper_match_known};
use crate::ledger::{GroupMutation, TripMutation};

use super::allocator::evaluate_admission;

/// Another trip as seen from the trip being classified.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerView {
    pub trip_id: TripId,
    pub radii: Radii,

    /// Distances to the trip being classified, when known.
    pub distances: Option<PairDistances>,
}

/// The candidate's group and its members' views.
#[derive(Debug, Clone)]
pub struct GroupContext {
    pub group: TripGroup,
    pub members: Vec<PeerView>,
}

/// What the caller fetched about the candidate beyond its own record.
#[derive(Debug, Clone, Default)]
pub struct ClassifyContext {
    /// The trip holding the candidate, if the candidate is reserved.
    pub holder: Option<PeerView>,

    /// The candidate's group, if the candidate is paid.
    pub group: Option<GroupContext>,

    /// The trip holding the newcomer, seen from the candidate.
    pub newcomer_holder: Option<PeerView>,
}

/// Whether a trip can join a paid candidate's group.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Matched(PotentialGroupMember),
    Obstructed(PotentialGroupMember),
}

impl Admission {
    pub fn from_entry(entry: PotentialGroupMember) -> Self {
        if entry.is_admissible() {
            Admission::Matched(entry)
        } else {
            Admission::Obstructed(entry)
        }
    }

    pub fn entry(&self) -> &PotentialGroupMember {
        match self {
            Admission::Matched(e) | Admission::Obstructed(e) => e,
        }
    }
}

/// How a newcomer and a candidate relate.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// Both sides record each other as matched.
    MutualMatch,

    /// The pair matches but the candidate's holder does not match the
    /// newcomer. The candidate records the newcomer as matched; the newcomer
    /// records the candidate as potential with a reservation obstruction.
    HeldByReservation { holder: TripId },

    /// The pair matches but the newcomer's own holder does not match the
    /// candidate. Mirror of [`MatchOutcome::HeldByReservation`]: the newcomer
    /// records the candidate as matched, the candidate records the newcomer as
    /// potential with a reservation obstruction.
    NewcomerHeld { holder: TripId },

    /// Both sides record each other as potential.
    Potential {
        proper_match: bool,
        reserving_trip_obstruction: bool,
    },

    /// The candidate is paid; the newcomer is checked against its group.
    GroupCandidate(Admission),
}

/// Decide how `newcomer` relates to `candidate`.
pub fn classify(
    newcomer: &Trip,
    candidate: &Trip,
    distances: PairDistances,
    context: &ClassifyContext,
) -> MatchOutcome {
    let proper = proper_match(newcomer.radii(), candidate.radii(), distances);

    if candidate.is_paid() {
        return match &context.group {
            Some(g) => MatchOutcome::GroupCandidate(Admission::from_entry(evaluate_admission(
                newcomer, &g.group, &g.members,
            ))),
            // Paid but not yet placed in a group.
            None => MatchOutcome::Potential {
                proper_match: proper,
                reserving_trip_obstruction: false,
            },
        };
    }

    let candidate_free = holder_accepts(candidate, newcomer, context.holder.as_ref());
    let newcomer_free = holder_accepts(newcomer, candidate, context.newcomer_holder.as_ref());

    match (proper, candidate_free, newcomer_free) {
        (true, true, true) => MatchOutcome::MutualMatch,
        (true, false, true) => match &candidate.reserving_trip_id {
            Some(holder) => MatchOutcome::HeldByReservation {
                holder: holder.clone(),
            },
            None => MatchOutcome::MutualMatch,
        },
        (true, true, false) => match &newcomer.reserving_trip_id {
            Some(holder) => MatchOutcome::NewcomerHeld {
                holder: holder.clone(),
            },
            None => MatchOutcome::MutualMatch,
        },
        // Both sides are held elsewhere.
        (true, false, false) => MatchOutcome::Potential {
            proper_match: true,
            reserving_trip_obstruction: true,
        },
        (false, accepts, _) => MatchOutcome::Potential {
            proper_match: false,
            reserving_trip_obstruction: candidate.reserved && !accepts,
        },
    }
}

/// Whether `held`'s holder, if any, properly matches `other`.
///
/// An unknown holder or unknown distance blocks.
fn holder_accepts(held: &Trip, other: &Trip, holder: Option<&PeerView>) -> bool {
    match (&held.reserving_trip_id, holder) {
        (None, _) => true,
        (Some(h), _) if h == &other.trip_id => true,
        (Some(_), Some(view)) => proper_match_known(view.radii, other.radii(), view.distances),
        (Some(_), None) => false,
    }
}

/// Mutations that record an outcome on both records and the candidate's group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PairWrites {
    pub newcomer: Vec<TripMutation>,
    pub candidate: Vec<TripMutation>,
    pub group: Vec<GroupMutation>,
}

/// Translate an outcome into writes.
pub fn relation_writes(
    newcomer: &Trip,
    candidate: &Trip,
    distances: PairDistances,
    outcome: &MatchOutcome,
) -> PairWrites {
    let candidate_seen = candidate.snapshot(distances);
    let newcomer_seen = newcomer.snapshot(distances);
    let mut writes = PairWrites::default();

    match outcome {
        MatchOutcome::MutualMatch => {
            writes.newcomer.push(TripMutation::UpsertMatched(MatchedRelation::new(
                candidate.trip_id.clone(),
                candidate_seen,
            )));
            writes.candidate.push(TripMutation::UpsertMatched(MatchedRelation::new(
                newcomer.trip_id.clone(),
                newcomer_seen,
            )));
        }
        MatchOutcome::HeldByReservation { .. } => {
            writes.newcomer.push(TripMutation::UpsertPotential(PotentialRelation {
                reserving_trip_obstruction: true,
                mutual: false,
                ..PotentialRelation::new(candidate.trip_id.clone(), candidate_seen, true)
            }));
            writes.candidate.push(TripMutation::UpsertMatched(MatchedRelation {
                mutual: false,
                ..MatchedRelation::new(newcomer.trip_id.clone(), newcomer_seen)
            }));
        }
        MatchOutcome::NewcomerHeld { .. } => {
            writes.newcomer.push(TripMutation::UpsertMatched(MatchedRelation {
                mutual: false,
                ..MatchedRelation::new(candidate.trip_id.clone(), candidate_seen)
            }));
            writes.candidate.push(TripMutation::UpsertPotential(PotentialRelation {
                reserving_trip_obstruction: true,
                mutual: false,
                ..PotentialRelation::new(newcomer.trip_id.clone(), newcomer_seen, true)
            }));
        }
        MatchOutcome::Potential {
            proper_match,
            reserving_trip_obstruction,
        } => {
            writes.newcomer.push(TripMutation::UpsertPotential(PotentialRelation {
                paid: candidate.is_paid(),
                trip_group_id: candidate.trip_group_id.clone(),
                reserving_trip_obstruction: *reserving_trip_obstruction,
                ..PotentialRelation::new(candidate.trip_id.clone(), candidate_seen, *proper_match)
            }));
            writes.candidate.push(TripMutation::UpsertPotential(PotentialRelation::new(
                newcomer.trip_id.clone(),
                newcomer_seen,
                *proper_match,
            )));
        }
        MatchOutcome::GroupCandidate(admission) => {
            match admission {
                Admission::Matched(_) => {
                    writes.newcomer.push(TripMutation::UpsertMatched(MatchedRelation {
                        paid: true,
                        trip_group_id: candidate.trip_group_id.clone(),
                        ..MatchedRelation::new(candidate.trip_id.clone(), candidate_seen)
                    }));
                    writes.candidate.push(TripMutation::UpsertMatched(MatchedRelation::new(
                        newcomer.trip_id.clone(),
                        newcomer_seen,
                    )));
                }
                Admission::Obstructed(entry) => {
                    let proper = proper_match(newcomer.radii(), candidate.radii(), distances);
                    writes.newcomer.push(TripMutation::UpsertPotential(obstructed_relation(
                        candidate,
                        candidate_seen,
                        proper,
                        entry,
                    )));
                    writes.candidate.push(TripMutation::UpsertPotential(PotentialRelation::new(
                        newcomer.trip_id.clone(),
                        newcomer_seen,
                        proper,
                    )));
                }
            }
            if candidate.trip_group_id.is_some() {
                writes
                    .group
                    .push(GroupMutation::UpsertPotentialMember(admission.entry().clone()));
            }
        }
    }

    writes.newcomer.push(TripMutation::RefreshStatus);
    writes.candidate.push(TripMutation::RefreshStatus);
    writes
}

/// The relation a would-be joiner keeps to a member of a group it cannot join.
pub(crate) fn obstructed_relation(
    member: &Trip,
    snapshot: RelationSnapshot,
    proper_match: bool,
    entry: &PotentialGroupMember,
) -> PotentialRelation {
    let (pickup_gap, destination_gap) = entry.largest_gaps();
    PotentialRelation {
        paid: true,
        trip_group_id: member.trip_group_id.clone(),
        trip_obstruction: entry.trip_obstruction,
        seat_obstruction: entry.seat_obstruction,
        unknown_trip_obstruction: entry.unknown_trip_obstruction,
        group_largest_pickup_overlap_gap: pickup_gap,
        group_largest_destination_overlap_gap: destination_gap,
        total_seat_count: member.total_seat_count,
        ..PotentialRelation::new(member.trip_id.clone(), snapshot, proper_match)
    }
}
