//! Mock distance oracle for testing and local runs without API access.
//!
//! Serves distances from an explicit pair table, falling back to
//! great-circle distance for pairs that were never set. Failures can be
//! injected to exercise retry paths.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::RwLock;

use super::error::OracleError;
use super::{DistanceMatrix, DistanceOracle, MAX_PAIRS_PER_CALL};
use crate::domain::LatLng;

type PointKey = (u64, u64);

fn key(p: &LatLng) -> PointKey {
    (p.lat.to_bits(), p.lng.to_bits())
}

fn pair_key(a: &LatLng, b: &LatLng) -> (PointKey, PointKey) {
    let (ka, kb) = (key(a), key(b));
    if ka <= kb { (ka, kb) } else { (kb, ka) }
}

/// Mock oracle with a symmetric distance table.
#[derive(Debug, Clone, Default)]
pub struct MockDistanceOracle {
    distances: Arc<RwLock<HashMap<(PointKey, PointKey), f64>>>,
    unroutable: Arc<RwLock<HashSet<(PointKey, PointKey)>>>,
    failures_remaining: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
    pairs: Arc<AtomicUsize>,
}

impl MockDistanceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix the distance between two points, in both directions.
    pub async fn set_distance(&self, a: LatLng, b: LatLng, metres: f64) {
        self.distances.write().await.insert(pair_key(&a, &b), metres);
    }

    /// Make the pair unroutable (the oracle returns no distance).
    pub async fn set_unroutable(&self, a: LatLng, b: LatLng) {
        self.unroutable.write().await.insert(pair_key(&a, &b));
    }

    /// Fail the next `n` calls with a 503.
    pub fn fail_next(&self, n: usize) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Number of `matrix` calls made, including failed ones.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Total pairs served by successful calls.
    pub fn pair_count(&self) -> usize {
        self.pairs.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl DistanceOracle for MockDistanceOracle {
    async fn matrix(
        &self,
        origins: &[LatLng],
        destinations: &[LatLng],
    ) -> Result<DistanceMatrix, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let pairs = origins.len() * destinations.len();
        if pairs > MAX_PAIRS_PER_CALL {
            return Err(OracleError::TooManyPairs {
                pairs,
                limit: MAX_PAIRS_PER_CALL,
            });
        }
        if self.take_failure() {
            return Err(OracleError::ApiError {
                status: 503,
                message: "mock failure".to_string(),
            });
        }

        let distances = self.distances.read().await;
        let unroutable = self.unroutable.read().await;
        let rows = origins
            .iter()
            .map(|o| {
                destinations
                    .iter()
                    .map(|d| {
                        let k = pair_key(o, d);
                        if unroutable.contains(&k) {
                            None
                        } else {
                            Some(distances.get(&k).copied().unwrap_or_else(|| o.haversine_m(d)))
                        }
                    })
                    .collect()
            })
            .collect();

        self.pairs.fetch_add(pairs, Ordering::SeqCst);
        Ok(DistanceMatrix::new(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(lat: f64, lng: f64) -> LatLng {
        LatLng::new(lat, lng).unwrap()
    }

    #[tokio::test]
    async fn serves_fixed_distances_symmetrically() {
        let oracle = MockDistanceOracle::new();
        oracle.set_distance(p(1.0, 1.0), p(2.0, 2.0), 4000.0).await;

        let m = oracle.matrix(&[p(2.0, 2.0)], &[p(1.0, 1.0)]).await.unwrap();
        assert_eq!(m.get(0, 0), Some(4000.0));
        assert_eq!(oracle.call_count(), 1);
        assert_eq!(oracle.pair_count(), 1);
    }

    #[tokio::test]
    async fn falls_back_to_great_circle() {
        let oracle = MockDistanceOracle::new();
        let m = oracle.matrix(&[p(0.0, 0.0)], &[p(0.0, 0.0), p(1.0, 0.0)]).await.unwrap();
        assert_eq!(m.get(0, 0), Some(0.0));
        assert!(m.get(0, 1).unwrap() > 100_000.0);
    }

    #[tokio::test]
    async fn injected_failures_run_out() {
        let oracle = MockDistanceOracle::new();
        oracle.fail_next(2);
        let a = [p(0.0, 0.0)];
        assert!(oracle.matrix(&a, &a).await.is_err());
        assert!(oracle.matrix(&a, &a).await.is_err());
        assert!(oracle.matrix(&a, &a).await.is_ok());
        assert_eq!(oracle.call_count(), 3);
    }

    #[tokio::test]
    async fn unroutable_pairs_have_no_distance() {
        let oracle = MockDistanceOracle::new();
        oracle.set_unroutable(p(0.0, 0.0), p(0.0, 1.0)).await;
        let m = oracle.matrix(&[p(0.0, 1.0)], &[p(0.0, 0.0)]).await.unwrap();
        assert_eq!(m.get(0, 0), None);
    }
}
