//! Matcher configuration.

use std::time::Duration;

use crate::oracle::MAX_PAIRS_PER_CALL;

/// Configuration parameters for matching.
#[derive(Debug, Clone)]
pub struct MatcherConfig {
    /// Targets per distance oracle call. Clamped to the oracle's pair limit.
    pub batch_size: usize,

    /// Candidates further than this (metres) on either leg get no relation.
    pub max_candidate_distance_m: f64,

    /// How many times a read-decide-write step is redone after the record
    /// changed underneath it.
    pub stale_retry_limit: u32,

    /// Retries for a distance chunk that failed with a transient error.
    pub oracle_retry_limit: u32,

    /// Delay before the first chunk retry (milliseconds). Doubles each time.
    pub oracle_backoff_ms: u64,

    /// Seed for tie-breaking. `None` seeds from the OS.
    pub rng_seed: Option<u64>,
}

impl MatcherConfig {
    /// Create a new configuration with the given parameters.
    pub fn new(
        batch_size: usize,
        max_candidate_distance_m: f64,
        stale_retry_limit: u32,
        oracle_retry_limit: u32,
        oracle_backoff_ms: u64,
    ) -> Self {
        Self {
            batch_size,
            max_candidate_distance_m,
            stale_retry_limit,
            oracle_retry_limit,
            oracle_backoff_ms,
            rng_seed: None,
        }
    }

    /// Use a fixed seed so tie-breaks are reproducible.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Returns the initial oracle retry delay as a Duration.
    pub fn oracle_backoff(&self) -> Duration {
        Duration::from_millis(self.oracle_backoff_ms)
    }
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: MAX_PAIRS_PER_CALL,
            max_candidate_distance_m: 9_850.0,
            stale_retry_limit: 3,
            oracle_retry_limit: 2,
            oracle_backoff_ms: 250,
            rng_seed: None,
        }
    }
}
