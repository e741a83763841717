//! Data transfer objects for web requests and responses.

use serde::{Deserialize, Serialize};

use crate::domain::{DomainError, Endpoint, TimeWindow, Trip, TripId, UserId};

/// Body of `PUT /trips/{id}`.
///
/// Only the rider-owned fields. Status, relations, holds and group
/// membership are written by the matcher and never accepted from clients.
#[derive(Debug, Clone, Deserialize)]
pub struct TripRequest {
    pub user_id: UserId,
    pub pickup: Endpoint,
    pub destination: Endpoint,
    pub seat_count: u8,
    pub window: TimeWindow,
}

impl TripRequest {
    /// A fresh trip record for this request.
    pub fn into_trip(self, trip_id: TripId) -> Result<Trip, DomainError> {
        let trip = Trip::new(
            trip_id,
            self.user_id,
            self.pickup,
            self.destination,
            self.seat_count,
            self.window,
        );
        trip.validate()?;
        Ok(trip)
    }
}

/// Error body returned with every non-2xx response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
