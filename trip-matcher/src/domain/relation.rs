//! Relations a trip records about its counterparts.
//!
//! A trip keeps two arrays: `matched_trips` for counterparts it properly
//! matches and could ride with, and `potential_trips` for counterparts that
//! are nearby but blocked (by geometry, a reservation, or a paid group they
//! cannot join). Each relation carries a snapshot of the counterpart's radii,
//! the measured road distances, and the counterpart's seat count, so that
//! most decisions can be re-derived without another distance lookup.

use serde::{Deserialize, Serialize};

use super::ids::{TripGroupId, TripId};
use crate::geometry::{PairDistances, Radii};

/// Which array a relation lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    Matched,
    Potential,
}

/// Counterpart data captured when the relation was written.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelationSnapshot {
    pub pickup_radius: f64,
    pub destination_radius: f64,
    pub pickup_distance: f64,
    pub destination_distance: f64,
    pub seat_count: u8,
}

impl RelationSnapshot {
    pub fn new(counterpart: Radii, distances: PairDistances, seat_count: u8) -> Self {
        Self {
            pickup_radius: counterpart.pickup,
            destination_radius: counterpart.destination,
            pickup_distance: distances.pickup,
            destination_distance: distances.destination,
            seat_count,
        }
    }

    /// The counterpart's radii at the time of the snapshot.
    pub fn radii(&self) -> Radii {
        Radii::new(self.pickup_radius, self.destination_radius)
    }

    pub fn distances(&self) -> PairDistances {
        PairDistances::new(self.pickup_distance, self.destination_distance)
    }

    pub(crate) fn is_valid(&self) -> bool {
        [
            self.pickup_radius,
            self.destination_radius,
            self.pickup_distance,
            self.destination_distance,
        ]
        .iter()
        .all(|v| v.is_finite() && *v >= 0.0)
            && (1..=4).contains(&self.seat_count)
    }
}

/// A counterpart this trip properly matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedRelation {
    pub trip_id: TripId,
    pub paid: bool,
    pub trip_group_id: Option<TripGroupId>,
    #[serde(flatten)]
    pub snapshot: RelationSnapshot,

    /// True when the counterpart also records this trip as matched.
    pub mutual: bool,

    /// True when this trip holds a reservation on the counterpart.
    pub reserving: bool,
}

impl MatchedRelation {
    pub fn new(trip_id: TripId, snapshot: RelationSnapshot) -> Self {
        Self {
            trip_id,
            paid: false,
            trip_group_id: None,
            snapshot,
            mutual: true,
            reserving: false,
        }
    }

    /// Turn this into a potential relation, keeping payment state and snapshot.
    pub fn demote(self, proper_match: bool) -> PotentialRelation {
        PotentialRelation {
            paid: self.paid,
            trip_group_id: self.trip_group_id,
            ..PotentialRelation::new(self.trip_id, self.snapshot, proper_match)
        }
    }
}

/// A nearby counterpart that this trip cannot currently ride with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PotentialRelation {
    pub trip_id: TripId,
    pub paid: bool,
    pub trip_group_id: Option<TripGroupId>,
    #[serde(flatten)]
    pub snapshot: RelationSnapshot,

    /// Whether the pair satisfies the geometric rule on both legs.
    pub proper_match: bool,

    /// The counterpart's group has a member this trip does not properly match.
    pub trip_obstruction: bool,

    /// The counterpart's group does not have enough free seats.
    pub seat_obstruction: bool,

    /// The counterpart is held by a trip that this trip does not properly match.
    pub reserving_trip_obstruction: bool,

    /// True when the counterpart also records this trip as potential.
    pub mutual: bool,

    pub group_largest_pickup_overlap_gap: Option<f64>,
    pub group_largest_destination_overlap_gap: Option<f64>,

    /// Distances to some group member are unknown.
    pub unknown_trip_obstruction: bool,

    /// Seats taken in the counterpart's group, when it is paid.
    pub total_seat_count: Option<u8>,
}

impl PotentialRelation {
    pub fn new(trip_id: TripId, snapshot: RelationSnapshot, proper_match: bool) -> Self {
        Self {
            trip_id,
            paid: false,
            trip_group_id: None,
            snapshot,
            proper_match,
            trip_obstruction: false,
            seat_obstruction: false,
            reserving_trip_obstruction: false,
            mutual: true,
            group_largest_pickup_overlap_gap: None,
            group_largest_destination_overlap_gap: None,
            unknown_trip_obstruction: false,
            total_seat_count: None,
        }
    }

    /// Turn this into a matched relation, keeping payment state and snapshot.
    pub fn promote(self) -> MatchedRelation {
        MatchedRelation {
            paid: self.paid,
            trip_group_id: self.trip_group_id,
            ..MatchedRelation::new(self.trip_id, self.snapshot)
        }
    }

    /// Clear every group-derived field.
    pub fn clear_group_obstructions(&mut self) {
        self.trip_obstruction = false;
        self.seat_obstruction = false;
        self.unknown_trip_obstruction = false;
        self.group_largest_pickup_overlap_gap = None;
        self.group_largest_destination_overlap_gap = None;
        self.total_seat_count = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> RelationSnapshot {
        RelationSnapshot::new(
            Radii::new(2000.0, 2000.0),
            PairDistances::new(4000.0, 3900.0),
            1,
        )
    }

    #[test]
    fn snapshot_accessors() {
        let s = snapshot();
        assert_eq!(s.radii(), Radii::new(2000.0, 2000.0));
        assert_eq!(s.distances().combined(), 7900.0);
        assert!(s.is_valid());
    }

    #[test]
    fn snapshot_rejects_bad_values() {
        let mut s = snapshot();
        s.pickup_distance = -1.0;
        assert!(!s.is_valid());

        let mut s = snapshot();
        s.seat_count = 0;
        assert!(!s.is_valid());
    }

    #[test]
    fn demote_keeps_payment_state() {
        let group = TripGroupId::new("g1").unwrap();
        let mut rel = MatchedRelation::new(TripId::new("t2").unwrap(), snapshot());
        rel.paid = true;
        rel.trip_group_id = Some(group.clone());
        rel.reserving = true;

        let demoted = rel.demote(false);
        assert!(demoted.paid);
        assert_eq!(demoted.trip_group_id, Some(group));
        assert!(!demoted.proper_match);
        assert_eq!(demoted.snapshot, snapshot());
    }

    #[test]
    fn promote_drops_obstructions() {
        let mut rel = PotentialRelation::new(TripId::new("t2").unwrap(), snapshot(), true);
        rel.reserving_trip_obstruction = true;
        rel.seat_obstruction = true;

        let promoted = rel.promote();
        assert!(promoted.mutual);
        assert!(!promoted.reserving);
    }

    #[test]
    fn serialized_shape_is_flat() {
        let rel = MatchedRelation::new(TripId::new("t2").unwrap(), snapshot());
        let value = serde_json::to_value(&rel).unwrap();
        assert_eq!(value["trip_id"], "t2");
        assert_eq!(value["pickup_distance"], 4000.0);
        assert_eq!(value["seat_count"], 1);
        assert_eq!(value["trip_group_id"], serde_json::Value::Null);
    }
}
