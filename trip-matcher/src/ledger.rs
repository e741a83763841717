//! Record mutations and the invariants they preserve.
//!
//! Every write the matcher makes is a list of [`TripMutation`]s or
//! [`GroupMutation`]s applied to one record at a time. Each mutation sets a
//! field to a value rather than toggling it, so replaying a list leaves the
//! record unchanged. A list is applied to a copy and committed only if every
//! mutation succeeds and the result validates, which gives per-record
//! atomicity in any store that can swap one document.
//!
//! Invariants kept here rather than at the call sites:
//! - a counterpart appears at most once across `matched_trips` and
//!   `potential_trips`; upserting one kind removes the other;
//! - the `reserving` flag on a matched relation changes only through
//!   [`TripMutation::SetReserving`], and a reserving relation cannot be
//!   demoted or removed until the hold is released;
//! - a hold is claimed only when the trip is free or already held by the
//!   same holder, and released only by its holder;
//! - a group never exceeds [`GROUP_CAPACITY`] seats.

use crate::domain::{
    Endpoint, GROUP_CAPACITY, GroupMember, MatchedRelation, PotentialGroupMember,
    PotentialRelation, TimeWindow, Trip, TripGroup, TripGroupId, TripId, TripStatus,
};
use crate::geometry::Radii;

/// A write that would break a record invariant or act on stale state.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    /// The record changed since it was read; the caller should re-read.
    #[error("stale state on {trip_id}: {reason}")]
    Stale {
        trip_id: TripId,
        reason: &'static str,
    },

    #[error("relation from {trip_id} to {counterpart} holds a reservation")]
    ReservingRelation { trip_id: TripId, counterpart: TripId },

    #[error("group {group_id} has {remaining} seats left, {requested} requested")]
    CapacityExceeded {
        group_id: TripGroupId,
        requested: u8,
        remaining: u8,
    },
}

/// One field-level change to a trip record.
#[derive(Debug, Clone, PartialEq)]
pub enum TripMutation {
    SetStatus(TripStatus),

    /// Replace the rider-owned fields of the request.
    SetRide {
        pickup: Endpoint,
        destination: Endpoint,
        seat_count: u8,
        window: TimeWindow,
    },

    /// Recompute status from the relation arrays. Paid trips are left alone.
    RefreshStatus,

    /// Insert or replace a matched relation, removing any potential entry.
    UpsertMatched(MatchedRelation),

    /// Insert or replace a potential relation, removing any matched entry.
    UpsertPotential(PotentialRelation),

    RemoveRelation(TripId),

    SetMutual { trip_id: TripId, mutual: bool },

    SetReserving { trip_id: TripId, reserving: bool },

    SetReservingObstruction { trip_id: TripId, obstructed: bool },

    /// Record that the counterpart joined (or left) a group.
    SetCounterpartGroup {
        trip_id: TripId,
        trip_group_id: Option<TripGroupId>,
        total_seat_count: Option<u8>,
    },

    /// Refresh the counterpart's radii and seat count in the snapshot.
    SetCounterpartSnapshot {
        trip_id: TripId,
        radii: Radii,
        seat_count: u8,
    },

    ClaimHold { holder: TripId },

    ReleaseHold { holder: TripId },

    JoinGroup {
        trip_group_id: TripGroupId,
        total_seat_count: u8,
    },

    SetGroupSeats { total_seat_count: u8 },

    LeaveGroup,
}

/// One change to a trip group record.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupMutation {
    AddMember(GroupMember),
    RemoveMember(TripId),
    UpsertPotentialMember(PotentialGroupMember),
    RemovePotentialMember(TripId),
}

/// Apply `mutations` to `trip` all-or-nothing.
pub fn apply_trip(trip: &mut Trip, mutations: &[TripMutation]) -> Result<(), LedgerError> {
    let mut next = trip.clone();
    for mutation in mutations {
        apply_one(&mut next, mutation)?;
    }
    *trip = next;
    Ok(())
}

fn reserving_guard(trip: &Trip, counterpart: &TripId) -> Result<(), LedgerError> {
    if trip.matched(counterpart).is_some_and(|r| r.reserving) {
        return Err(LedgerError::ReservingRelation {
            trip_id: trip.trip_id.clone(),
            counterpart: counterpart.clone(),
        });
    }
    Ok(())
}

fn apply_one(trip: &mut Trip, mutation: &TripMutation) -> Result<(), LedgerError> {
    match mutation {
        TripMutation::SetStatus(status) => trip.status = *status,
        TripMutation::SetRide {
            pickup,
            destination,
            seat_count,
            window,
        } => {
            trip.pickup = pickup.clone();
            trip.destination = destination.clone();
            trip.seat_count = *seat_count;
            trip.window = *window;
        }
        TripMutation::RefreshStatus => trip.status = trip.derived_status(),
        TripMutation::UpsertMatched(rel) => {
            trip.potential_trips.retain(|r| r.trip_id != rel.trip_id);
            match trip.matched_trips.iter_mut().find(|r| r.trip_id == rel.trip_id) {
                Some(existing) => {
                    let reserving = existing.reserving;
                    *existing = rel.clone();
                    existing.reserving = reserving;
                }
                None => trip.matched_trips.push(MatchedRelation {
                    reserving: false,
                    ..rel.clone()
                }),
            }
        }
        TripMutation::UpsertPotential(rel) => {
            reserving_guard(trip, &rel.trip_id)?;
            trip.matched_trips.retain(|r| r.trip_id != rel.trip_id);
            match trip
                .potential_trips
                .iter_mut()
                .find(|r| r.trip_id == rel.trip_id)
            {
                Some(existing) => *existing = rel.clone(),
                None => trip.potential_trips.push(rel.clone()),
            }
        }
        TripMutation::RemoveRelation(id) => {
            reserving_guard(trip, id)?;
            trip.matched_trips.retain(|r| &r.trip_id != id);
            trip.potential_trips.retain(|r| &r.trip_id != id);
        }
        TripMutation::SetMutual { trip_id, mutual } => {
            if let Some(r) = trip.matched_trips.iter_mut().find(|r| &r.trip_id == trip_id) {
                r.mutual = *mutual;
            }
            if let Some(r) = trip
                .potential_trips
                .iter_mut()
                .find(|r| &r.trip_id == trip_id)
            {
                r.mutual = *mutual;
            }
        }
        TripMutation::SetReserving { trip_id, reserving } => {
            if let Some(r) = trip.matched_trips.iter_mut().find(|r| &r.trip_id == trip_id) {
                r.reserving = *reserving;
            } else if *reserving {
                return Err(LedgerError::Stale {
                    trip_id: trip.trip_id.clone(),
                    reason: "hold target is no longer a matched relation",
                });
            }
        }
        TripMutation::SetReservingObstruction {
            trip_id,
            obstructed,
        } => {
            if let Some(r) = trip
                .potential_trips
                .iter_mut()
                .find(|r| &r.trip_id == trip_id)
            {
                r.reserving_trip_obstruction = *obstructed;
            }
        }
        TripMutation::SetCounterpartGroup {
            trip_id,
            trip_group_id,
            total_seat_count,
        } => {
            let paid = trip_group_id.is_some();
            if let Some(r) = trip.matched_trips.iter_mut().find(|r| &r.trip_id == trip_id) {
                r.paid = paid;
                r.trip_group_id = trip_group_id.clone();
            }
            if let Some(r) = trip
                .potential_trips
                .iter_mut()
                .find(|r| &r.trip_id == trip_id)
            {
                r.paid = paid;
                r.trip_group_id = trip_group_id.clone();
                if paid {
                    r.total_seat_count = *total_seat_count;
                } else {
                    r.clear_group_obstructions();
                }
            }
        }
        TripMutation::SetCounterpartSnapshot {
            trip_id,
            radii,
            seat_count,
        } => {
            let snapshots = trip
                .matched_trips
                .iter_mut()
                .filter(|r| &r.trip_id == trip_id)
                .map(|r| &mut r.snapshot)
                .chain(
                    trip.potential_trips
                        .iter_mut()
                        .filter(|r| &r.trip_id == trip_id)
                        .map(|r| &mut r.snapshot),
                );
            for snapshot in snapshots {
                snapshot.pickup_radius = radii.pickup;
                snapshot.destination_radius = radii.destination;
                snapshot.seat_count = *seat_count;
            }
        }
        TripMutation::ClaimHold { holder } => {
            if trip.is_paid() {
                return Err(LedgerError::Stale {
                    trip_id: trip.trip_id.clone(),
                    reason: "paid trips cannot be held",
                });
            }
            if trip.reserved && trip.reserving_trip_id.as_ref() != Some(holder) {
                return Err(LedgerError::Stale {
                    trip_id: trip.trip_id.clone(),
                    reason: "already held by another trip",
                });
            }
            trip.reserved = true;
            trip.reserving_trip_id = Some(holder.clone());
        }
        TripMutation::ReleaseHold { holder } => {
            if !trip.reserved {
                return Ok(());
            }
            if trip.reserving_trip_id.as_ref() != Some(holder) {
                return Err(LedgerError::Stale {
                    trip_id: trip.trip_id.clone(),
                    reason: "held by a different trip",
                });
            }
            trip.reserved = false;
            trip.reserving_trip_id = None;
        }
        TripMutation::JoinGroup {
            trip_group_id,
            total_seat_count,
        } => {
            trip.status = TripStatus::Paid;
            trip.trip_group_id = Some(trip_group_id.clone());
            trip.total_seat_count = Some(*total_seat_count);
            trip.fully_matched = *total_seat_count >= GROUP_CAPACITY;
        }
        TripMutation::SetGroupSeats { total_seat_count } => {
            if trip.trip_group_id.is_some() {
                trip.total_seat_count = Some(*total_seat_count);
                trip.fully_matched = *total_seat_count >= GROUP_CAPACITY;
            }
        }
        TripMutation::LeaveGroup => {
            trip.trip_group_id = None;
            trip.total_seat_count = None;
            trip.fully_matched = false;
            trip.status = if trip.matched_trips.is_empty() {
                TripStatus::Unmatched
            } else {
                TripStatus::Matched
            };
        }
    }
    Ok(())
}

/// Apply `mutations` to `group` all-or-nothing.
pub fn apply_group(group: &mut TripGroup, mutations: &[GroupMutation]) -> Result<(), LedgerError> {
    let mut next = group.clone();
    for mutation in mutations {
        match mutation {
            GroupMutation::AddMember(member) => {
                if next.is_member(&member.trip_id) {
                    continue;
                }
                if !next.has_room_for(member.seat_count) {
                    return Err(LedgerError::CapacityExceeded {
                        group_id: next.group_id.clone(),
                        requested: member.seat_count,
                        remaining: next.remaining_seats(),
                    });
                }
                next.potential_trip_members
                    .retain(|p| p.trip_id != member.trip_id);
                next.total_seat_count += member.seat_count;
                next.trip_group_members.push(member.clone());
            }
            GroupMutation::RemoveMember(id) => {
                if let Some(pos) = next.trip_group_members.iter().position(|m| &m.trip_id == id) {
                    let removed = next.trip_group_members.remove(pos);
                    next.total_seat_count =
                        next.total_seat_count.saturating_sub(removed.seat_count);
                }
            }
            GroupMutation::UpsertPotentialMember(entry) => {
                if next.is_member(&entry.trip_id) {
                    continue;
                }
                match next
                    .potential_trip_members
                    .iter_mut()
                    .find(|p| p.trip_id == entry.trip_id)
                {
                    Some(existing) => *existing = entry.clone(),
                    None => next.potential_trip_members.push(entry.clone()),
                }
            }
            GroupMutation::RemovePotentialMember(id) => {
                next.potential_trip_members.retain(|p| &p.trip_id != id);
            }
        }
    }
    *group = next;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Endpoint, LatLng, RelationSnapshot, TimeWindow, UserId};
    use chrono::Utc;
    use crate::geometry::PairDistances;

    fn id(s: &str) -> TripId {
        TripId::new(s).unwrap()
    }

    fn trip(s: &str) -> Trip {
        let p = LatLng::new(6.5, 3.3).unwrap();
        Trip::new(
            id(s),
            UserId::new("u").unwrap(),
            Endpoint::new(p, 2000.0, "Lagos"),
            Endpoint::new(p, 2000.0, "Lagos"),
            1,
            TimeWindow::fixed(Utc::now()),
        )
    }

    fn snap() -> RelationSnapshot {
        RelationSnapshot::new(Radii::new(2000.0, 2000.0), PairDistances::new(1.0, 2.0), 1)
    }

    fn member(s: &str, seats: u8) -> GroupMember {
        GroupMember {
            trip_id: id(s),
            user_id: UserId::new("u").unwrap(),
            seat_count: seats,
            joined_at: Utc::now(),
        }
    }

    #[test]
    fn upsert_moves_between_arrays() {
        let mut t = trip("a");
        apply_trip(
            &mut t,
            &[TripMutation::UpsertPotential(PotentialRelation::new(
                id("b"),
                snap(),
                false,
            ))],
        )
        .unwrap();
        assert_eq!(t.potential_trips.len(), 1);

        apply_trip(
            &mut t,
            &[TripMutation::UpsertMatched(MatchedRelation::new(id("b"), snap()))],
        )
        .unwrap();
        assert_eq!(t.matched_trips.len(), 1);
        assert!(t.potential_trips.is_empty());
        assert!(t.validate().is_ok());
    }

    #[test]
    fn replaying_mutations_is_idempotent() {
        let muts = [
            TripMutation::UpsertMatched(MatchedRelation::new(id("b"), snap())),
            TripMutation::RefreshStatus,
            TripMutation::ClaimHold { holder: id("h") },
        ];
        let mut once = trip("a");
        apply_trip(&mut once, &muts).unwrap();
        let mut twice = once.clone();
        apply_trip(&mut twice, &muts).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once.status, TripStatus::Matched);
    }

    #[test]
    fn upsert_keeps_reserving_flag() {
        let mut t = trip("a");
        apply_trip(
            &mut t,
            &[
                TripMutation::UpsertMatched(MatchedRelation::new(id("b"), snap())),
                TripMutation::SetReserving {
                    trip_id: id("b"),
                    reserving: true,
                },
                TripMutation::UpsertMatched(MatchedRelation::new(id("b"), snap())),
            ],
        )
        .unwrap();
        assert!(t.matched(&id("b")).unwrap().reserving);
    }

    #[test]
    fn reserving_relation_cannot_be_demoted() {
        let mut t = trip("a");
        apply_trip(
            &mut t,
            &[
                TripMutation::UpsertMatched(MatchedRelation::new(id("b"), snap())),
                TripMutation::SetReserving {
                    trip_id: id("b"),
                    reserving: true,
                },
            ],
        )
        .unwrap();
        let before = t.clone();
        let err = apply_trip(
            &mut t,
            &[TripMutation::UpsertPotential(PotentialRelation::new(
                id("b"),
                snap(),
                false,
            ))],
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::ReservingRelation { .. }));
        assert_eq!(t, before);
    }

    #[test]
    fn hold_claimed_by_one_holder_only() {
        let mut t = trip("a");
        apply_trip(&mut t, &[TripMutation::ClaimHold { holder: id("h1") }]).unwrap();
        let err = apply_trip(&mut t, &[TripMutation::ClaimHold { holder: id("h2") }]).unwrap_err();
        assert!(matches!(err, LedgerError::Stale { .. }));

        let err =
            apply_trip(&mut t, &[TripMutation::ReleaseHold { holder: id("h2") }]).unwrap_err();
        assert!(matches!(err, LedgerError::Stale { .. }));

        apply_trip(&mut t, &[TripMutation::ReleaseHold { holder: id("h1") }]).unwrap();
        assert!(!t.reserved);
        assert!(t.reserving_trip_id.is_none());

        // Releasing a free trip is a no-op.
        apply_trip(&mut t, &[TripMutation::ReleaseHold { holder: id("h1") }]).unwrap();
    }

    #[test]
    fn paid_trip_cannot_be_held() {
        let mut t = trip("a");
        t.status = TripStatus::Paid;
        assert!(apply_trip(&mut t, &[TripMutation::ClaimHold { holder: id("h") }]).is_err());
    }

    #[test]
    fn counterpart_group_cleared_on_leave() {
        let mut t = trip("a");
        let mut rel = PotentialRelation::new(id("b"), snap(), true);
        rel.seat_obstruction = true;
        rel.group_largest_pickup_overlap_gap = Some(10.0);
        let g = TripGroupId::new("g").unwrap();
        apply_trip(
            &mut t,
            &[
                TripMutation::UpsertPotential(rel),
                TripMutation::SetCounterpartGroup {
                    trip_id: id("b"),
                    trip_group_id: Some(g),
                    total_seat_count: Some(3),
                },
            ],
        )
        .unwrap();
        let r = t.potential(&id("b")).unwrap();
        assert!(r.paid);
        assert_eq!(r.total_seat_count, Some(3));

        apply_trip(
            &mut t,
            &[TripMutation::SetCounterpartGroup {
                trip_id: id("b"),
                trip_group_id: None,
                total_seat_count: None,
            }],
        )
        .unwrap();
        let r = t.potential(&id("b")).unwrap();
        assert!(!r.paid);
        assert!(!r.seat_obstruction);
        assert_eq!(r.group_largest_pickup_overlap_gap, None);
    }

    #[test]
    fn join_and_leave_group() {
        let mut t = trip("a");
        let g = TripGroupId::new("g").unwrap();
        apply_trip(
            &mut t,
            &[TripMutation::JoinGroup {
                trip_group_id: g.clone(),
                total_seat_count: 4,
            }],
        )
        .unwrap();
        assert!(t.is_paid());
        assert!(t.fully_matched);

        apply_trip(&mut t, &[TripMutation::LeaveGroup]).unwrap();
        assert_eq!(t.status, TripStatus::Unmatched);
        assert!(t.trip_group_id.is_none());
        assert!(!t.fully_matched);
    }

    #[test]
    fn group_capacity_enforced() {
        let mut g = TripGroup::new(TripGroupId::new("g").unwrap(), member("a", 3));
        let err = apply_group(&mut g, &[GroupMutation::AddMember(member("b", 2))]).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::CapacityExceeded {
                requested: 2,
                remaining: 1,
                ..
            }
        ));
        assert_eq!(g.total_seat_count, 3);

        apply_group(&mut g, &[GroupMutation::AddMember(member("c", 1))]).unwrap();
        assert_eq!(g.total_seat_count, 4);
        // Adding an existing member again changes nothing.
        apply_group(&mut g, &[GroupMutation::AddMember(member("c", 1))]).unwrap();
        assert_eq!(g.total_seat_count, 4);
        assert!(g.validate().is_ok());
    }

    #[test]
    fn adding_member_clears_potential_entry() {
        let mut g = TripGroup::new(TripGroupId::new("g").unwrap(), member("a", 1));
        let entry = PotentialGroupMember {
            trip_id: id("b"),
            obstructing_trip_members: Vec::new(),
            trip_obstruction: false,
            seat_obstruction: false,
            seat_count: 1,
            unknown_trip_obstruction: false,
        };
        apply_group(&mut g, &[GroupMutation::UpsertPotentialMember(entry.clone())]).unwrap();
        apply_group(&mut g, &[GroupMutation::UpsertPotentialMember(entry)]).unwrap();
        assert_eq!(g.potential_trip_members.len(), 1);

        apply_group(&mut g, &[GroupMutation::AddMember(member("b", 1))]).unwrap();
        assert!(g.potential_trip_members.is_empty());
        assert_eq!(g.member_count(), 2);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn seat_total_never_exceeds_capacity(seats in prop::collection::vec(1u8..=4, 1..10)) {
                let mut g = TripGroup::new(TripGroupId::new("g").unwrap(), member("m0", seats[0]));
                for (i, s) in seats.iter().enumerate().skip(1) {
                    let _ = apply_group(&mut g, &[GroupMutation::AddMember(member(&format!("m{i}"), *s))]);
                    prop_assert!(g.total_seat_count <= GROUP_CAPACITY);
                    prop_assert!(g.validate().is_ok());
                }
            }
        }
    }
}
