//! Event entry points.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::allocator::{AllocationOutcome, Allocator};
use super::classify::{
    Admission, ClassifyContext, GroupContext, MatchOutcome, PeerView, classify, relation_writes,
};
use super::config::MatcherConfig;
use super::error::MatchError;
use super::reconcile::{ReconcileReport, Reconciler};
use super::reservation::Reservations;
use super::tiebreak::Tiebreaker;
use crate::domain::{LatLng, Trip, TripId};
use crate::events::TripEvent;
use crate::geometry::PairDistances;
use crate::ledger::TripMutation;
use crate::oracle::{DistanceBatch, DistanceOracle};
use crate::store::{CandidateQuery, TripStore};

/// Counts of what a creation event wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchReport {
    /// Candidates within range on both legs.
    pub measured: usize,
    pub matched: usize,
    pub potential: usize,
    /// Candidates blocked by another trip's hold.
    pub held: usize,
    /// Paid candidates checked against their group.
    pub group_candidates: usize,
}

impl MatchReport {
    fn record(&mut self, outcome: &MatchOutcome) {
        match outcome {
            MatchOutcome::MutualMatch => self.matched += 1,
            MatchOutcome::HeldByReservation { .. } | MatchOutcome::NewcomerHeld { .. } => {
                self.held += 1
            }
            MatchOutcome::Potential { .. } => self.potential += 1,
            MatchOutcome::GroupCandidate(admission) => {
                self.group_candidates += 1;
                match admission {
                    Admission::Matched(_) => self.matched += 1,
                    Admission::Obstructed(_) => self.potential += 1,
                }
            }
        }
    }
}

/// Result of handling one event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    Matched(MatchReport),
    Reconciled(ReconcileReport),
    Allocated(AllocationOutcome),
}

/// Matches trips as they are created, edited and paid.
///
/// The engine keeps no state between events beyond its store and oracle
/// handles, so any number of events can run concurrently.
pub struct MatchEngine<S, O> {
    store: Arc<S>,
    oracle: Arc<O>,
    config: MatcherConfig,
    tiebreak: Tiebreaker,
}

impl<S: TripStore, O: DistanceOracle> MatchEngine<S, O> {
    pub fn new(store: Arc<S>, oracle: Arc<O>, config: MatcherConfig) -> Self {
        let tiebreak = Tiebreaker::new(config.rng_seed);
        Self {
            store,
            oracle,
            config,
            tiebreak,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    fn allocator(&self) -> Allocator<'_, S> {
        Allocator::new(&*self.store, &self.tiebreak, self.config.stale_retry_limit)
    }

    fn reservations(&self) -> Reservations<'_, S> {
        Reservations::new(&*self.store, &self.tiebreak, self.config.stale_retry_limit)
    }

    async fn load(&self, id: &TripId) -> Result<Trip, MatchError> {
        self.store
            .get_trip(id)
            .await?
            .ok_or_else(|| MatchError::TripNotFound(id.clone()))
    }

    pub async fn handle(&self, event: &TripEvent) -> Result<EventOutcome, MatchError> {
        match event {
            TripEvent::Created(trip) => self
                .on_trip_created(&trip.trip_id)
                .await
                .map(EventOutcome::Matched),
            TripEvent::Updated { before, after } => self
                .on_trip_updated(before, after)
                .await
                .map(EventOutcome::Reconciled),
            TripEvent::Paid(trip) => self
                .on_trip_paid(&trip.trip_id)
                .await
                .map(EventOutcome::Allocated),
        }
    }

    /// Relate a new trip to every candidate in range.
    ///
    /// All distances are fetched before anything is written, so an oracle
    /// failure leaves every record as it was.
    pub async fn on_trip_created(&self, trip_id: &TripId) -> Result<MatchReport, MatchError> {
        let trip = self.load(trip_id).await?;
        let candidates = self
            .store
            .query_candidates(&CandidateQuery::for_trip(&trip))
            .await?;
        debug!(trip = %trip_id, candidates = candidates.len(), "candidates queried");

        let in_range = self.measure(&trip, candidates).await?;
        if in_range.is_empty() {
            self.store
                .update_trip(trip_id, &[TripMutation::RefreshStatus])
                .await?;
            info!(trip = %trip_id, "no candidates in range");
            return Err(MatchError::NoCandidatesFound(trip_id.clone()));
        }

        let measured: HashMap<TripId, PairDistances> = in_range
            .iter()
            .map(|(c, d)| (c.trip_id.clone(), *d))
            .collect();
        let mut report = MatchReport {
            measured: in_range.len(),
            ..MatchReport::default()
        };

        for (candidate, distances) in &in_range {
            let mut attempt = 0;
            loop {
                match self
                    .relate(trip_id, &candidate.trip_id, *distances, &measured)
                    .await
                {
                    Ok(Some(outcome)) => {
                        report.record(&outcome);
                        break;
                    }
                    Ok(None) => break,
                    Err(MatchError::StaleReservationState(_))
                        if attempt < self.config.stale_retry_limit =>
                    {
                        attempt += 1;
                        debug!(
                            trip = %trip_id,
                            candidate = %candidate.trip_id,
                            attempt,
                            "stale state, re-reading"
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        self.store
            .update_trip(trip_id, &[TripMutation::RefreshStatus])
            .await?;
        info!(
            trip = %trip_id,
            matched = report.matched,
            potential = report.potential,
            held = report.held,
            "trip matched"
        );
        Ok(report)
    }

    /// Pickup distances for every candidate, then destination distances for
    /// those still in range.
    async fn measure(
        &self,
        trip: &Trip,
        candidates: Vec<Trip>,
    ) -> Result<Vec<(Trip, PairDistances)>, MatchError> {
        let cutoff = self.config.max_candidate_distance_m;
        let within = |d: Option<f64>| d.filter(|m| *m <= cutoff);

        let pickups = self
            .lookup(trip.pickup.location, candidates.iter().map(|c| c.pickup.location))
            .await?;
        let near: Vec<(Trip, f64)> = candidates
            .into_iter()
            .zip(pickups)
            .filter_map(|(c, d)| within(d).map(|d| (c, d)))
            .collect();

        let destinations = self
            .lookup(
                trip.destination.location,
                near.iter().map(|(c, _)| c.destination.location),
            )
            .await?;
        Ok(near
            .into_iter()
            .zip(destinations)
            .filter_map(|((c, pickup), d)| {
                within(d).map(|dest| (c, PairDistances::new(pickup, dest)))
            })
            .collect())
    }

    async fn lookup(
        &self,
        origin: LatLng,
        targets: impl Iterator<Item = LatLng>,
    ) -> Result<Vec<Option<f64>>, MatchError> {
        let mut batch =
            DistanceBatch::new(origin, targets.enumerate().collect(), self.config.batch_size);
        batch
            .run(
                &*self.oracle,
                self.config.oracle_retry_limit,
                self.config.oracle_backoff(),
            )
            .await?;
        Ok(batch.into_results().into_iter().map(|(_, d)| d).collect())
    }

    /// Classify one pair from fresh reads and write the outcome.
    async fn relate(
        &self,
        trip_id: &TripId,
        candidate_id: &TripId,
        distances: PairDistances,
        measured: &HashMap<TripId, PairDistances>,
    ) -> Result<Option<MatchOutcome>, MatchError> {
        let trip = self.load(trip_id).await?;
        let Some(candidate) = self.store.get_trip(candidate_id).await? else {
            warn!(trip = %trip_id, candidate = %candidate_id, "candidate disappeared");
            return Ok(None);
        };
        let known = |other: &TripId| {
            measured
                .get(other)
                .copied()
                .or_else(|| trip.stored_distances(other))
        };

        let holder = match candidate.reserving_trip_id.as_ref().filter(|h| *h != trip_id) {
            Some(h) => self.store.get_trip(h).await?.map(|h| PeerView {
                distances: known(&h.trip_id).or_else(|| h.stored_distances(trip_id)),
                trip_id: h.trip_id.clone(),
                radii: h.radii(),
            }),
            None => None,
        };

        // A trip held by a sole member only matches candidates its holder
        // also matches.
        let newcomer_holder = match trip.reserving_trip_id.as_ref().filter(|h| *h != candidate_id) {
            Some(h) => self.store.get_trip(h).await?.map(|h| PeerView {
                distances: candidate
                    .stored_distances(&h.trip_id)
                    .or_else(|| h.stored_distances(candidate_id)),
                trip_id: h.trip_id.clone(),
                radii: h.radii(),
            }),
            None => None,
        };

        let group = match (&candidate.trip_group_id, candidate.is_paid()) {
            (Some(gid), true) => match self.store.get_group(gid).await? {
                Some(group) => {
                    let ids = group.member_ids();
                    let records = join_all(ids.iter().map(|m| self.store.get_trip(m))).await;
                    let mut members = Vec::new();
                    for record in records {
                        if let Some(m) = record? {
                            members.push(PeerView {
                                distances: if m.trip_id == *candidate_id {
                                    Some(distances)
                                } else {
                                    known(&m.trip_id)
                                },
                                trip_id: m.trip_id.clone(),
                                radii: m.radii(),
                            });
                        }
                    }
                    Some(GroupContext { group, members })
                }
                None => None,
            },
            _ => None,
        };

        let context = ClassifyContext {
            holder,
            group,
            newcomer_holder,
        };
        let outcome = classify(&trip, &candidate, distances, &context);
        let admitted = matches!(outcome, MatchOutcome::GroupCandidate(Admission::Matched(_)));

        // A sole member already holding this trip keeps the hold only if the
        // trip is still admissible.
        let mut released = false;
        if !admitted && candidate.matched(trip_id).is_some_and(|r| r.reserving) {
            released = self.reservations().release(candidate_id, trip_id).await?;
        }

        let writes = relation_writes(&trip, &candidate, distances, &outcome);
        self.store.update_trip(trip_id, &writes.newcomer).await?;
        self.store.update_trip(candidate_id, &writes.candidate).await?;
        if let (Some(gid), false) = (&candidate.trip_group_id, writes.group.is_empty()) {
            self.store.update_group(gid, &writes.group).await?;
        }
        debug!(trip = %trip_id, candidate = %candidate_id, ?outcome, "pair classified");

        if released {
            self.allocator().reselect_or_dissolve(candidate_id).await?;
        } else if admitted {
            let hold = self.reservations().reselect(candidate_id).await?;
            debug!(holder = %candidate_id, ?hold, "sole member hold checked");
        }
        Ok(Some(outcome))
    }

    /// Re-evaluate a trip's relations after its radii or seat count changed.
    pub async fn on_trip_updated(
        &self,
        before: &Trip,
        after: &Trip,
    ) -> Result<ReconcileReport, MatchError> {
        Reconciler::new(&*self.store, &self.tiebreak, self.config.stale_retry_limit)
            .on_trip_updated(before, after)
            .await
    }

    /// Place a paying trip in a group.
    pub async fn on_trip_paid(&self, trip_id: &TripId) -> Result<AllocationOutcome, MatchError> {
        let outcome = self.allocator().on_trip_paid(trip_id).await?;
        info!(trip = %trip_id, group = %outcome.group_id(), "trip allocated");
        Ok(outcome)
    }
}
