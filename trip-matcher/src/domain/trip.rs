//! The trip record.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::DomainError;
use super::ids::{TripGroupId, TripId, UserId};
use super::location::Endpoint;
use super::relation::{MatchedRelation, PotentialRelation, RelationKind, RelationSnapshot};
use crate::geometry::{PairDistances, Radii};

/// Lifecycle status of a trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Unmatched,
    Matched,
    Paid,
}

/// When a trip wants to travel.
///
/// A fixed-time trip leaves at `start`; a flexible trip can leave any time
/// between `start` and `end`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub is_time_fixed: bool,
}

impl TimeWindow {
    pub fn flexible(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            is_time_fixed: false,
        }
    }

    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self {
            start: at,
            end: at,
            is_time_fixed: true,
        }
    }

    fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t <= self.end
    }

    /// Whether two trips could depart together.
    ///
    /// A fixed trip's departure must fall inside the other window; two
    /// flexible windows only need to intersect.
    pub fn is_compatible_with(&self, other: &TimeWindow) -> bool {
        match (self.is_time_fixed, other.is_time_fixed) {
            (false, false) => self.start <= other.end && other.start <= self.end,
            (true, false) => other.contains(self.start),
            (false, true) => self.contains(other.start),
            (true, true) => self.start == other.start,
        }
    }
}

/// A ride request and everything the matcher has recorded about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub trip_id: TripId,
    pub user_id: UserId,
    pub pickup: Endpoint,
    pub destination: Endpoint,
    pub seat_count: u8,
    pub window: TimeWindow,
    pub status: TripStatus,

    /// Member of a group with no seats left.
    #[serde(default)]
    pub fully_matched: bool,

    /// Held by a forming group's sole member.
    #[serde(default)]
    pub reserved: bool,
    #[serde(default)]
    pub reserving_trip_id: Option<TripId>,

    #[serde(default)]
    pub trip_group_id: Option<TripGroupId>,

    /// Seats taken in this trip's group, once paid.
    #[serde(default)]
    pub total_seat_count: Option<u8>,

    #[serde(default)]
    pub matched_trips: Vec<MatchedRelation>,
    #[serde(default)]
    pub potential_trips: Vec<PotentialRelation>,
}

impl Trip {
    /// Create a fresh unmatched trip with no relations.
    pub fn new(
        trip_id: TripId,
        user_id: UserId,
        pickup: Endpoint,
        destination: Endpoint,
        seat_count: u8,
        window: TimeWindow,
    ) -> Self {
        Self {
            trip_id,
            user_id,
            pickup,
            destination,
            seat_count,
            window,
            status: TripStatus::Unmatched,
            fully_matched: false,
            reserved: false,
            reserving_trip_id: None,
            trip_group_id: None,
            total_seat_count: None,
            matched_trips: Vec::new(),
            potential_trips: Vec::new(),
        }
    }

    pub fn radii(&self) -> Radii {
        Radii::new(self.pickup.radius, self.destination.radius)
    }

    pub fn is_paid(&self) -> bool {
        self.status == TripStatus::Paid
    }

    /// Snapshot of this trip as a counterpart sees it.
    pub fn snapshot(&self, distances: PairDistances) -> RelationSnapshot {
        RelationSnapshot::new(self.radii(), distances, self.seat_count)
    }

    pub fn matched(&self, id: &TripId) -> Option<&MatchedRelation> {
        self.matched_trips.iter().find(|r| &r.trip_id == id)
    }

    pub fn potential(&self, id: &TripId) -> Option<&PotentialRelation> {
        self.potential_trips.iter().find(|r| &r.trip_id == id)
    }

    pub fn relation_kind(&self, id: &TripId) -> Option<RelationKind> {
        if self.matched(id).is_some() {
            Some(RelationKind::Matched)
        } else if self.potential(id).is_some() {
            Some(RelationKind::Potential)
        } else {
            None
        }
    }

    /// Distances recorded for `id`, looking in matched relations first.
    pub fn stored_distances(&self, id: &TripId) -> Option<PairDistances> {
        self.matched(id)
            .map(|r| r.snapshot.distances())
            .or_else(|| self.potential(id).map(|r| r.snapshot.distances()))
    }

    /// Ids of every counterpart, matched first.
    pub fn counterpart_ids(&self) -> Vec<TripId> {
        self.matched_trips
            .iter()
            .map(|r| r.trip_id.clone())
            .chain(self.potential_trips.iter().map(|r| r.trip_id.clone()))
            .collect()
    }

    /// The status implied by the relation arrays. Paid trips stay paid.
    pub fn derived_status(&self) -> TripStatus {
        if self.is_paid() {
            TripStatus::Paid
        } else if self.matched_trips.is_empty() {
            TripStatus::Unmatched
        } else {
            TripStatus::Matched
        }
    }

    /// Check every field. Called before a record is written to the store.
    pub fn validate(&self) -> Result<(), DomainError> {
        self.pickup.validate("pickup")?;
        self.destination.validate("destination")?;

        if !(1..=4).contains(&self.seat_count) {
            return Err(DomainError::InvalidSeatCount(self.seat_count));
        }
        if self.window.end < self.window.start {
            return Err(DomainError::InvalidWindow);
        }
        if self.reserved != self.reserving_trip_id.is_some() {
            return Err(DomainError::InvalidField {
                field: "reserved",
                reason: "reserved flag and reserving trip disagree".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for id in self.counterpart_ids() {
            if id == self.trip_id {
                return Err(DomainError::SelfRelation);
            }
            if !seen.insert(id.clone()) {
                let in_both = self.matched(&id).is_some() && self.potential(&id).is_some();
                return Err(if in_both {
                    DomainError::ConflictingRelation(id)
                } else {
                    DomainError::DuplicateRelation(id)
                });
            }
        }

        let snapshots_ok = self
            .matched_trips
            .iter()
            .map(|r| &r.snapshot)
            .chain(self.potential_trips.iter().map(|r| &r.snapshot))
            .all(RelationSnapshot::is_valid);
        if !snapshots_ok {
            return Err(DomainError::InvalidField {
                field: "relations",
                reason: "snapshot has negative or non-finite values".to_string(),
            });
        }

        Ok(())
    }
}
