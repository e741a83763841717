//! Geometric compatibility between two trips.
//!
//! Each trip has a tolerance radius around its pickup and its destination.
//! Two trips are a proper match when, for both legs, their radii together
//! cover the road distance between their points with at least
//! [`REQUIRED_OVERLAP_M`] metres to spare.

use serde::{Deserialize, Serialize};

/// Minimum overlap (metres) two tolerance circles must share on each leg.
pub const REQUIRED_OVERLAP_M: f64 = 150.0;

/// Pickup and destination tolerance radii of one trip, in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Radii {
    pub pickup: f64,
    pub destination: f64,
}

impl Radii {
    pub fn new(pickup: f64, destination: f64) -> Self {
        Self {
            pickup,
            destination,
        }
    }
}

/// Road distances between two trips' pickups and between their destinations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PairDistances {
    pub pickup: f64,
    pub destination: f64,
}

impl PairDistances {
    pub fn new(pickup: f64, destination: f64) -> Self {
        Self {
            pickup,
            destination,
        }
    }

    /// Sum of both legs. Used to rank holds and groups by closeness.
    pub fn combined(&self) -> f64 {
        self.pickup + self.destination
    }
}

/// Overlap gaps on both legs. `None` on a leg means the distance is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OverlapGaps {
    pub pickup: Option<f64>,
    pub destination: Option<f64>,
}

fn leg_matches(a_radius: f64, b_radius: f64, distance: f64) -> bool {
    a_radius + b_radius >= distance + REQUIRED_OVERLAP_M
}

/// Returns true if trips with radii `a` and `b` properly match.
///
/// # Examples
///
/// ```
/// use trip_matcher::geometry::{PairDistances, Radii, proper_match};
///
/// let a = Radii::new(2500.0, 2500.0);
/// let b = Radii::new(2000.0, 2000.0);
///
/// assert!(proper_match(a, b, PairDistances::new(4000.0, 3900.0)));
/// assert!(!proper_match(a, b, PairDistances::new(5200.0, 3900.0)));
/// ```
pub fn proper_match(a: Radii, b: Radii, distances: PairDistances) -> bool {
    leg_matches(a.pickup, b.pickup, distances.pickup)
        && leg_matches(a.destination, b.destination, distances.destination)
}

/// Like [`proper_match`], but an unknown distance never counts as a match.
pub fn proper_match_known(a: Radii, b: Radii, distances: Option<PairDistances>) -> bool {
    distances.is_some_and(|d| proper_match(a, b, d))
}

/// How many metres short of the required overlap one leg falls.
///
/// Zero when the leg is satisfied; `None` when the distance is unknown.
/// Callers must treat `None` as unknown, never as zero.
pub fn overlap_gap(a_radius: f64, b_radius: f64, distance: Option<f64>) -> Option<f64> {
    let distance = distance?;
    let shortfall = (distance + REQUIRED_OVERLAP_M) - (a_radius + b_radius);
    Some(shortfall.max(0.0))
}

/// Overlap gaps for both legs of a pair of trips.
pub fn overlap_gaps(a: Radii, b: Radii, distances: Option<PairDistances>) -> OverlapGaps {
    OverlapGaps {
        pickup: overlap_gap(a.pickup, b.pickup, distances.map(|d| d.pickup)),
        destination: overlap_gap(
            a.destination,
            b.destination,
            distances.map(|d| d.destination),
        ),
    }
}

/// Largest of two optional gaps, ignoring unknowns.
pub fn max_gap(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) => x,
        (None, y) => y,
    }
}
