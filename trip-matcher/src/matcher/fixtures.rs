//! Builders shared by the matcher tests.

use chrono::{TimeZone, Utc};

use crate::domain::{
    Endpoint, LatLng, MatchedRelation, PotentialRelation, TimeWindow, Trip, TripId, UserId,
};
use crate::geometry::PairDistances;
use crate::ledger::TripMutation;
use crate::store::{MemoryTripStore, TripStore};

pub fn id(s: &str) -> TripId {
    TripId::new(s).unwrap()
}

/// A Lagos trip with a pickup at `(lat, 3.3)` and a destination at `(lat, 3.5)`.
pub fn trip_at(name: &str, lat: f64, radius: f64, seats: u8) -> Trip {
    Trip::new(
        id(name),
        UserId::new(format!("u-{name}")).unwrap(),
        Endpoint::new(LatLng::new(lat, 3.3).unwrap(), radius, "Lagos"),
        Endpoint::new(LatLng::new(lat, 3.5).unwrap(), radius, "Lagos"),
        seats,
        TimeWindow::flexible(
            Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap(),
        ),
    )
}

pub fn trip(name: &str, radius: f64, seats: u8) -> Trip {
    trip_at(name, 6.5, radius, seats)
}

/// Record `a` and `b` as mutually matched.
pub async fn link_matched(store: &MemoryTripStore, a: &Trip, b: &Trip, d: PairDistances) {
    store
        .update_trip(
            &a.trip_id,
            &[
                TripMutation::UpsertMatched(MatchedRelation::new(b.trip_id.clone(), b.snapshot(d))),
                TripMutation::RefreshStatus,
            ],
        )
        .await
        .unwrap();
    store
        .update_trip(
            &b.trip_id,
            &[
                TripMutation::UpsertMatched(MatchedRelation::new(a.trip_id.clone(), a.snapshot(d))),
                TripMutation::RefreshStatus,
            ],
        )
        .await
        .unwrap();
}

/// Record `a` and `b` as mutual potentials.
pub async fn link_potential(
    store: &MemoryTripStore,
    a: &Trip,
    b: &Trip,
    d: PairDistances,
    proper_match: bool,
) {
    store
        .update_trip(
            &a.trip_id,
            &[TripMutation::UpsertPotential(PotentialRelation::new(
                b.trip_id.clone(),
                b.snapshot(d),
                proper_match,
            ))],
        )
        .await
        .unwrap();
    store
        .update_trip(
            &b.trip_id,
            &[TripMutation::UpsertPotential(PotentialRelation::new(
                a.trip_id.clone(),
                a.snapshot(d),
                proper_match,
            ))],
        )
        .await
        .unwrap();
}

pub async fn stored(store: &MemoryTripStore, name: &str) -> Trip {
    store.get_trip(&id(name)).await.unwrap().unwrap()
}

pub async fn put_all(store: &MemoryTripStore, trips: &[&Trip]) {
    for t in trips {
        store.put_trip((*t).clone()).await.unwrap();
    }
}
