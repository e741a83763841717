//! Chunked one-to-many distance lookups.

use std::time::Duration;

use tracing::{debug, warn};

use super::error::OracleError;
use super::{DistanceOracle, MAX_PAIRS_PER_CALL};
use crate::domain::LatLng;

/// Distances from one origin to many keyed targets, fetched in chunks.
///
/// The cursor only advances past a chunk once its call succeeds, so after
/// an error [`run`](DistanceBatch::run) can be called again and continues
/// from the first chunk that has no results.
#[derive(Debug, Clone)]
pub struct DistanceBatch<K> {
    origin: LatLng,
    targets: Vec<(K, LatLng)>,
    chunk_size: usize,
    cursor: usize,
    results: Vec<(K, Option<f64>)>,
}

impl<K: Clone> DistanceBatch<K> {
    /// `chunk_size` is clamped to `1..=MAX_PAIRS_PER_CALL`.
    pub fn new(origin: LatLng, targets: Vec<(K, LatLng)>, chunk_size: usize) -> Self {
        Self {
            origin,
            results: Vec::with_capacity(targets.len()),
            targets,
            chunk_size: chunk_size.clamp(1, MAX_PAIRS_PER_CALL),
            cursor: 0,
        }
    }

    /// Index of the first target without a result.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_complete(&self) -> bool {
        self.cursor >= self.targets.len()
    }

    /// Fetch the next chunk. Returns how many targets it covered.
    pub async fn next_chunk<O: DistanceOracle>(
        &mut self,
        oracle: &O,
    ) -> Result<usize, OracleError> {
        let end = (self.cursor + self.chunk_size).min(self.targets.len());
        let chunk = &self.targets[self.cursor..end];
        if chunk.is_empty() {
            return Ok(0);
        }

        let destinations: Vec<LatLng> = chunk.iter().map(|(_, p)| *p).collect();
        let matrix = oracle.matrix(&[self.origin], &destinations).await?;
        matrix.check_shape(1, destinations.len())?;

        self.results.extend(
            chunk
                .iter()
                .enumerate()
                .map(|(i, (k, _))| (k.clone(), matrix.get(0, i))),
        );
        let covered = end - self.cursor;
        self.cursor = end;
        Ok(covered)
    }

    /// Fetch every remaining chunk.
    ///
    /// A chunk failing with a transient error is retried up to `retries`
    /// times, doubling `backoff` between attempts.
    pub async fn run<O: DistanceOracle>(
        &mut self,
        oracle: &O,
        retries: u32,
        backoff: Duration,
    ) -> Result<(), OracleError> {
        while !self.is_complete() {
            let mut attempt = 0;
            loop {
                match self.next_chunk(oracle).await {
                    Ok(n) => {
                        debug!(covered = n, cursor = self.cursor, total = self.targets.len(), "distance chunk fetched");
                        break;
                    }
                    Err(e) if e.is_transient() && attempt < retries => {
                        let delay = backoff * 2u32.saturating_pow(attempt);
                        warn!(cursor = self.cursor, attempt, error = %e, "distance chunk failed, retrying");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    /// Results in target order. Incomplete batches return what was fetched.
    pub fn into_results(self) -> Vec<(K, Option<f64>)> {
        self.results
    }
}
