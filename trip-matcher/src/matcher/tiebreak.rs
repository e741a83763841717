//! Uniform random tie-breaking.

use std::cmp::Ordering;
use std::sync::Mutex;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Picks the minimum of a set, choosing uniformly among equal minima.
#[derive(Debug)]
pub struct Tiebreaker {
    rng: Mutex<StdRng>,
}

impl Tiebreaker {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            rng: Mutex::new(rng),
        }
    }

    /// The item with the smallest key. Incomparable keys (NaN) never win.
    pub fn pick_min_by<T, K, F>(&self, items: Vec<T>, key: F) -> Option<T>
    where
        K: PartialOrd,
        F: Fn(&T) -> K,
    {
        let keyed: Vec<(K, T)> = items.into_iter().map(|t| (key(&t), t)).collect();

        let mut best: Option<&K> = None;
        for (k, _) in &keyed {
            if k.partial_cmp(k).is_none() {
                continue;
            }
            if best.is_none_or(|b| k.partial_cmp(b) == Some(Ordering::Less)) {
                best = Some(k);
            }
        }
        let best = best?;
        let tied: Vec<usize> = keyed
            .iter()
            .enumerate()
            .filter(|(_, (k, _))| k.partial_cmp(best) == Some(Ordering::Equal))
            .map(|(i, _)| i)
            .collect();

        let chosen = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            *tied.choose(&mut *rng)?
        };
        keyed.into_iter().nth(chosen).map(|(_, t)| t)
    }
}

impl Default for Tiebreaker {
    fn default() -> Self {
        Self::new(None)
    }
}
