//! Caching layer for road distances.
//!
//! Trips cluster around the same pickup points, so the same pairs are
//! measured again and again as new trips arrive and old ones are edited.
//! Road distance between two points changes slowly, which makes a TTL cache
//! in front of the oracle safe.
//!
//! Coordinates are quantized to 1e-6 degrees (about 11 cm) for the key.

use std::time::Duration;

use moka::future::Cache as MokaCache;
use tracing::trace;

use crate::domain::LatLng;
use crate::oracle::{DistanceMatrix, DistanceOracle, OracleError};

/// Quantized coordinate.
type PointKey = (i64, i64);

/// Cache key for one directed pair: (origin, destination).
type PairKey = (PointKey, PointKey);

fn point_key(p: &LatLng) -> PointKey {
    ((p.lat * 1e6).round() as i64, (p.lng * 1e6).round() as i64)
}

/// Configuration for the cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL for cached entries.
    pub ttl: Duration,

    /// Maximum number of cached pairs.
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(6 * 60 * 60),
            max_capacity: 100_000,
        }
    }
}

/// Distance oracle with caching.
///
/// Wraps any [`DistanceOracle`]. A request is served from the cache only when
/// every pair in it is cached; otherwise the whole request goes to the inner
/// oracle and every returned pair is cached. Unroutable pairs are cached too.
pub struct CachedDistanceOracle<O> {
    inner: O,
    pairs: MokaCache<PairKey, Option<f64>>,
}

impl<O: DistanceOracle> CachedDistanceOracle<O> {
    /// Create a new cached oracle.
    pub fn new(inner: O, config: &CacheConfig) -> Self {
        let pairs = MokaCache::builder()
            .time_to_live(config.ttl)
            .max_capacity(config.max_capacity)
            .build();

        Self { inner, pairs }
    }

    /// Access the underlying oracle for operations that bypass cache.
    pub fn inner(&self) -> &O {
        &self.inner
    }

    /// Get cache statistics (for monitoring).
    pub fn entry_count(&self) -> u64 {
        self.pairs.entry_count()
    }

    /// Invalidate all cached entries.
    pub fn invalidate_all(&self) {
        self.pairs.invalidate_all();
    }

    async fn lookup(&self, origins: &[LatLng], destinations: &[LatLng]) -> Option<DistanceMatrix> {
        let mut rows = Vec::with_capacity(origins.len());
        for o in origins {
            let mut row = Vec::with_capacity(destinations.len());
            for d in destinations {
                row.push(self.pairs.get(&(point_key(o), point_key(d))).await?);
            }
            rows.push(row);
        }
        Some(DistanceMatrix::new(rows))
    }
}

impl<O: DistanceOracle> DistanceOracle for CachedDistanceOracle<O> {
    async fn matrix(
        &self,
        origins: &[LatLng],
        destinations: &[LatLng],
    ) -> Result<DistanceMatrix, OracleError> {
        if let Some(hit) = self.lookup(origins, destinations).await {
            trace!(pairs = origins.len() * destinations.len(), "distance cache hit");
            return Ok(hit);
        }

        let matrix = self.inner.matrix(origins, destinations).await?;
        for (i, o) in origins.iter().enumerate() {
            for (j, d) in destinations.iter().enumerate() {
                self.pairs
                    .insert((point_key(o), point_key(d)), matrix.get(i, j))
                    .await;
            }
        }
        Ok(matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::MockDistanceOracle;

    fn p(lat: f64, lng: f64) -> LatLng {
        LatLng::new(lat, lng).unwrap()
    }

    #[test]
    fn default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.ttl, Duration::from_secs(21_600));
        assert_eq!(config.max_capacity, 100_000);
    }

    #[test]
    fn nearby_points_share_key() {
        assert_eq!(point_key(&p(6.5, 3.3)), point_key(&p(6.500_000_01, 3.3)));
        assert_ne!(point_key(&p(6.5, 3.3)), point_key(&p(6.500_01, 3.3)));
    }

    #[tokio::test]
    async fn second_request_served_from_cache() {
        let mock = MockDistanceOracle::new();
        mock.set_distance(p(1.0, 1.0), p(1.0, 1.01), 1234.0).await;
        let cached = CachedDistanceOracle::new(mock.clone(), &CacheConfig::default());

        let first = cached.matrix(&[p(1.0, 1.0)], &[p(1.0, 1.01)]).await.unwrap();
        let second = cached.matrix(&[p(1.0, 1.0)], &[p(1.0, 1.01)]).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second.get(0, 0), Some(1234.0));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn partial_hit_goes_to_oracle() {
        let mock = MockDistanceOracle::new();
        let cached = CachedDistanceOracle::new(mock.clone(), &CacheConfig::default());

        cached.matrix(&[p(1.0, 1.0)], &[p(1.0, 1.01)]).await.unwrap();
        cached
            .matrix(&[p(1.0, 1.0)], &[p(1.0, 1.01), p(1.0, 1.02)])
            .await
            .unwrap();
        assert_eq!(mock.call_count(), 2);

        cached.invalidate_all();
        cached.matrix(&[p(1.0, 1.0)], &[p(1.0, 1.01)]).await.unwrap();
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let mock = MockDistanceOracle::new();
        mock.fail_next(1);
        let cached = CachedDistanceOracle::new(mock.clone(), &CacheConfig::default());

        assert!(cached.matrix(&[p(1.0, 1.0)], &[p(2.0, 2.0)]).await.is_err());
        assert!(cached.matrix(&[p(1.0, 1.0)], &[p(2.0, 2.0)]).await.is_ok());
    }
}
