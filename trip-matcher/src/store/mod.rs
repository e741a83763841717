//! Persistence of trips and trip groups.
//!
//! The matcher never assumes a particular database. It needs keyed reads,
//! a filtered candidate query, and per-record atomic application of a
//! mutation list. [`MemoryTripStore`] is the in-process implementation used
//! by the server binary and the tests.

mod error;
mod memory;

use std::future::Future;

pub use error::StoreError;
pub use memory::MemoryTripStore;

use crate::domain::{TimeWindow, Trip, TripGroup, TripGroupId, TripId, UserId};
use crate::ledger::{GroupMutation, TripMutation};

/// Filter selecting trips that could ride with a given trip.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateQuery {
    pub trip_id: TripId,
    pub user_id: UserId,
    pub pickup_city: String,
    pub destination_city: String,
    pub window: TimeWindow,
}

impl CandidateQuery {
    pub fn for_trip(trip: &Trip) -> Self {
        Self {
            trip_id: trip.trip_id.clone(),
            user_id: trip.user_id.clone(),
            pickup_city: trip.pickup.city.clone(),
            destination_city: trip.destination.city.clone(),
            window: trip.window,
        }
    }

    /// Same cities, compatible departure time, not full, and another user's trip.
    pub fn matches(&self, other: &Trip) -> bool {
        other.trip_id != self.trip_id
            && other.user_id != self.user_id
            && !other.fully_matched
            && other.pickup.city == self.pickup_city
            && other.destination.city == self.destination_city
            && self.window.is_compatible_with(&other.window)
    }
}

/// Storage for trips and trip groups.
///
/// Writes from the matcher go through [`update_trip`](TripStore::update_trip)
/// and [`update_group`](TripStore::update_group), which must apply the whole
/// mutation list to one record atomically. `put_trip` is the external write
/// path (a rider creating or editing a trip).
pub trait TripStore: Send + Sync + 'static {
    fn get_trip(&self, id: &TripId)
    -> impl Future<Output = Result<Option<Trip>, StoreError>> + Send;

    /// Insert or replace a trip, returning the previous version.
    fn put_trip(&self, trip: Trip) -> impl Future<Output = Result<Option<Trip>, StoreError>> + Send;

    fn query_candidates(
        &self,
        query: &CandidateQuery,
    ) -> impl Future<Output = Result<Vec<Trip>, StoreError>> + Send;

    /// Apply `mutations` to one trip atomically and return the new version.
    fn update_trip(
        &self,
        id: &TripId,
        mutations: &[TripMutation],
    ) -> impl Future<Output = Result<Trip, StoreError>> + Send;

    fn get_group(
        &self,
        id: &TripGroupId,
    ) -> impl Future<Output = Result<Option<TripGroup>, StoreError>> + Send;

    /// Create a group. Fails if the id is taken.
    fn create_group(&self, group: TripGroup) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Apply `mutations` to one group atomically and return the new version.
    fn update_group(
        &self,
        id: &TripGroupId,
        mutations: &[GroupMutation],
    ) -> impl Future<Output = Result<TripGroup, StoreError>> + Send;

    /// Delete a group. Deleting a missing group is not an error.
    fn delete_group(&self, id: &TripGroupId) -> impl Future<Output = Result<(), StoreError>> + Send;
}
