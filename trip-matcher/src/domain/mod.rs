//! Domain types for the trip matcher.
//!
//! Trips, the relations they record about each other, and the groups paid
//! trips form. Records are plain serde structs shaped like the stored
//! documents; `validate` methods check them at the store boundary.

mod error;
mod group;
mod ids;
mod location;
mod relation;
mod trip;

pub use error::DomainError;
pub use group::{GROUP_CAPACITY, GroupMember, ObstructingMember, PotentialGroupMember, TripGroup};
pub use ids::{InvalidId, TripGroupId, TripId, UserId};
pub use location::{Endpoint, LatLng};
pub use relation::{MatchedRelation, PotentialRelation, RelationKind, RelationSnapshot};
pub use trip::{TimeWindow, Trip, TripStatus};
