//! Road distance lookups.
//!
//! The matcher measures pickup-to-pickup and destination-to-destination
//! road distances through a [`DistanceOracle`]. The production oracle is a
//! route matrix HTTP API that accepts at most [`MAX_PAIRS_PER_CALL`]
//! origin/destination pairs per request; [`DistanceBatch`] splits larger
//! lookups into chunks and keeps a cursor so a failed chunk can be retried
//! without repeating the ones that succeeded.

mod batch;
mod client;
mod error;
mod mock;
mod types;

use std::future::Future;

pub use batch::DistanceBatch;
pub use client::{OracleConfig, RouteMatrixClient};
pub use error::OracleError;
pub use mock::MockDistanceOracle;
pub use types::{Measure, RouteElement, RouteMatrixResponse};

use crate::domain::LatLng;

/// Most origin/destination pairs a single oracle call may contain.
pub const MAX_PAIRS_PER_CALL: usize = 625;

/// Distances in metres, `rows[i][j]` from origin `i` to destination `j`.
///
/// `None` marks a pair the oracle could not route.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    rows: Vec<Vec<Option<f64>>>,
}

impl DistanceMatrix {
    pub fn new(rows: Vec<Vec<Option<f64>>>) -> Self {
        Self { rows }
    }

    pub fn get(&self, origin: usize, destination: usize) -> Option<f64> {
        self.rows.get(origin)?.get(destination).copied().flatten()
    }

    /// (origins, destinations). Ragged matrices report their shortest row.
    pub fn shape(&self) -> (usize, usize) {
        let cols = self.rows.iter().map(Vec::len).min().unwrap_or(0);
        (self.rows.len(), cols)
    }

    pub fn row(&self, origin: usize) -> Option<&[Option<f64>]> {
        self.rows.get(origin).map(Vec::as_slice)
    }

    pub(crate) fn check_shape(
        &self,
        origins: usize,
        destinations: usize,
    ) -> Result<(), OracleError> {
        let ragged = self.rows.iter().any(|r| r.len() != destinations);
        if self.rows.len() != origins || ragged {
            return Err(OracleError::Shape {
                expected: (origins, destinations),
                got: self.shape(),
            });
        }
        Ok(())
    }
}

/// A source of road distances.
///
/// This abstraction allows the matcher to be tested with fixed distances.
pub trait DistanceOracle: Send + Sync + 'static {
    /// Road distance from every origin to every destination.
    ///
    /// Callers keep `origins.len() * destinations.len()` at or below
    /// [`MAX_PAIRS_PER_CALL`].
    fn matrix(
        &self,
        origins: &[LatLng],
        destinations: &[LatLng],
    ) -> impl Future<Output = Result<DistanceMatrix, OracleError>> + Send;
}
