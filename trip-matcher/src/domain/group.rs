//! Trip groups: paid trips sharing one ride.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::DomainError;
use super::ids::{TripGroupId, TripId, UserId};
use crate::geometry::max_gap;

/// Seats available in one shared ride.
pub const GROUP_CAPACITY: u8 = 4;

/// A paid trip inside a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMember {
    pub trip_id: TripId,
    pub user_id: UserId,
    pub seat_count: u8,
    pub joined_at: DateTime<Utc>,
}

/// A group member that blocks a would-be joiner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObstructingMember {
    pub trip_id: TripId,
    pub pickup_overlap_gap: Option<f64>,
    pub destination_overlap_gap: Option<f64>,

    /// No distances are known between the joiner and this member.
    pub unknown: bool,
}

/// A trip that relates to some member of the group, with what stops it joining.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PotentialGroupMember {
    pub trip_id: TripId,
    pub obstructing_trip_members: Vec<ObstructingMember>,
    pub trip_obstruction: bool,
    pub seat_obstruction: bool,
    pub seat_count: u8,
    pub unknown_trip_obstruction: bool,
}

impl PotentialGroupMember {
    /// Nothing stops this trip from joining.
    pub fn is_admissible(&self) -> bool {
        !self.trip_obstruction && !self.seat_obstruction && !self.unknown_trip_obstruction
    }

    /// Largest known gaps across obstructing members. Unknown entries are skipped.
    pub fn largest_gaps(&self) -> (Option<f64>, Option<f64>) {
        self.obstructing_trip_members
            .iter()
            .filter(|m| !m.unknown)
            .fold((None, None), |(p, d), m| {
                (
                    max_gap(p, m.pickup_overlap_gap),
                    max_gap(d, m.destination_overlap_gap),
                )
            })
    }
}

/// A capacity-bounded shared ride.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripGroup {
    pub group_id: TripGroupId,
    pub trip_group_members: Vec<GroupMember>,
    pub total_seat_count: u8,
    #[serde(default)]
    pub potential_trip_members: Vec<PotentialGroupMember>,
}

impl TripGroup {
    /// Start a group with its first paid member.
    pub fn new(group_id: TripGroupId, founder: GroupMember) -> Self {
        Self {
            group_id,
            total_seat_count: founder.seat_count,
            trip_group_members: vec![founder],
            potential_trip_members: Vec::new(),
        }
    }

    pub fn is_member(&self, id: &TripId) -> bool {
        self.trip_group_members.iter().any(|m| &m.trip_id == id)
    }

    pub fn member_ids(&self) -> Vec<TripId> {
        self.trip_group_members
            .iter()
            .map(|m| m.trip_id.clone())
            .collect()
    }

    pub fn member_count(&self) -> usize {
        self.trip_group_members.len()
    }

    /// The only member, if the group has exactly one.
    pub fn sole_member(&self) -> Option<&GroupMember> {
        match self.trip_group_members.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    pub fn remaining_seats(&self) -> u8 {
        GROUP_CAPACITY.saturating_sub(self.total_seat_count)
    }

    pub fn has_room_for(&self, seats: u8) -> bool {
        seats <= self.remaining_seats()
    }

    pub fn is_full(&self) -> bool {
        self.total_seat_count >= GROUP_CAPACITY
    }

    pub fn potential_member(&self, id: &TripId) -> Option<&PotentialGroupMember> {
        self.potential_trip_members.iter().find(|p| &p.trip_id == id)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.trip_group_members.is_empty() {
            return Err(DomainError::EmptyGroup);
        }
        let mut actual: u8 = 0;
        for member in &self.trip_group_members {
            if !(1..=GROUP_CAPACITY).contains(&member.seat_count) {
                return Err(DomainError::InvalidSeatCount(member.seat_count));
            }
            actual = actual.saturating_add(member.seat_count);
        }
        if actual > GROUP_CAPACITY {
            return Err(DomainError::OverCapacity(actual));
        }
        if actual != self.total_seat_count {
            return Err(DomainError::SeatTotalMismatch {
                recorded: self.total_seat_count,
                actual,
            });
        }
        if let Some(p) = self
            .potential_trip_members
            .iter()
            .find(|p| self.is_member(&p.trip_id))
        {
            return Err(DomainError::InvalidField {
                field: "potential_trip_members",
                reason: format!("{} is already a member", p.trip_id),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str, seats: u8) -> GroupMember {
        GroupMember {
            trip_id: TripId::new(id).unwrap(),
            user_id: UserId::new(format!("u-{id}")).unwrap(),
            seat_count: seats,
            joined_at: Utc::now(),
        }
    }

    fn obstructing(id: &str, gaps: (Option<f64>, Option<f64>), unknown: bool) -> ObstructingMember {
        ObstructingMember {
            trip_id: TripId::new(id).unwrap(),
            pickup_overlap_gap: gaps.0,
            destination_overlap_gap: gaps.1,
            unknown,
        }
    }

    #[test]
    fn seats_and_sole_member() {
        let mut g = TripGroup::new(TripGroupId::new("g").unwrap(), member("a", 3));
        assert_eq!(g.remaining_seats(), 1);
        assert!(g.has_room_for(1));
        assert!(!g.has_room_for(2));
        assert_eq!(g.sole_member().map(|m| m.trip_id.as_str()), Some("a"));

        g.trip_group_members.push(member("b", 1));
        g.total_seat_count = 4;
        assert!(g.is_full());
        assert!(g.sole_member().is_none());
        assert!(g.validate().is_ok());
    }

    #[test]
    fn validate_catches_mismatch_and_overflow() {
        let mut g = TripGroup::new(TripGroupId::new("g").unwrap(), member("a", 2));
        g.total_seat_count = 3;
        assert!(matches!(
            g.validate(),
            Err(DomainError::SeatTotalMismatch { .. })
        ));

        g.trip_group_members.push(member("b", 3));
        g.total_seat_count = 5;
        assert_eq!(g.validate(), Err(DomainError::OverCapacity(5)));
    }

    #[test]
    fn largest_gaps_skip_unknown() {
        let p = PotentialGroupMember {
            trip_id: TripId::new("x").unwrap(),
            obstructing_trip_members: vec![
                obstructing("a", (Some(100.0), Some(0.0)), false),
                obstructing("b", (Some(40.0), Some(300.0)), false),
                obstructing("c", (None, None), true),
            ],
            trip_obstruction: true,
            seat_obstruction: false,
            seat_count: 1,
            unknown_trip_obstruction: true,
        };
        assert_eq!(p.largest_gaps(), (Some(100.0), Some(300.0)));
        assert!(!p.is_admissible());
    }

    #[test]
    fn largest_gaps_all_unknown() {
        let p = PotentialGroupMember {
            trip_id: TripId::new("x").unwrap(),
            obstructing_trip_members: vec![obstructing("c", (None, None), true)],
            trip_obstruction: false,
            seat_obstruction: false,
            seat_count: 1,
            unknown_trip_obstruction: true,
        };
        assert_eq!(p.largest_gaps(), (None, None));
    }
}
