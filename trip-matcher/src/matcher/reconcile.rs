//! Re-evaluating relations after a rider edits a trip.

use std::collections::BTreeSet;

use tracing::{debug, info};

use super::allocator::Allocator;
use super::classify::{ClassifyContext, MatchOutcome, PeerView, classify, relation_writes};
use super::error::MatchError;
use super::reservation::Reservations;
use super::tiebreak::Tiebreaker;
use crate::domain::{RelationKind, Trip, TripGroupId, TripId};
use crate::geometry::{proper_match, proper_match_known};
use crate::ledger::TripMutation;
use crate::store::TripStore;

/// What an edit changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub snapshots_updated: usize,
    pub demoted: usize,
    pub promoted: usize,
    pub groups_refreshed: usize,
    pub holds_released: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

/// Whether an edit touched anything that matching depends on.
///
/// Only the radii and the seat count are compared; relation, status, hold
/// and group fields are written by the engine itself.
pub fn affects_matching(before: &Trip, after: &Trip) -> bool {
    before.radii() != after.radii() || before.seat_count != after.seat_count
}

pub(crate) struct Reconciler<'a, S> {
    store: &'a S,
    tiebreak: &'a Tiebreaker,
    retries: u32,
}

impl<'a, S: TripStore> Reconciler<'a, S> {
    pub(crate) fn new(store: &'a S, tiebreak: &'a Tiebreaker, retries: u32) -> Self {
        Self {
            store,
            tiebreak,
            retries,
        }
    }

    fn allocator(&self) -> Allocator<'a, S> {
        Allocator::new(self.store, self.tiebreak, self.retries)
    }

    fn reservations(&self) -> Reservations<'a, S> {
        Reservations::new(self.store, self.tiebreak, self.retries)
    }

    async fn load(&self, id: &TripId) -> Result<Trip, MatchError> {
        self.store
            .get_trip(id)
            .await?
            .ok_or_else(|| MatchError::TripNotFound(id.clone()))
    }

    pub(crate) async fn on_trip_updated(
        &self,
        before: &Trip,
        after: &Trip,
    ) -> Result<ReconcileReport, MatchError> {
        let mut report = ReconcileReport::default();
        if !affects_matching(before, after) {
            return Ok(report);
        }
        let trip_id = &after.trip_id;
        let trip = self.load(trip_id).await?;

        for cp in trip.counterpart_ids() {
            self.store
                .update_trip(
                    &cp,
                    &[TripMutation::SetCounterpartSnapshot {
                        trip_id: trip_id.clone(),
                        radii: trip.radii(),
                        seat_count: trip.seat_count,
                    }],
                )
                .await?;
            report.snapshots_updated += 1;
        }

        if let Some(holder) = trip.reserving_trip_id.clone() {
            if !self.hold_still_valid(&holder, &trip).await? {
                self.break_hold(&holder, trip_id, &mut report).await?;
            }
        }

        let trip = self.load(trip_id).await?;
        if trip.is_paid() {
            self.reconcile_paid(&trip, &mut report).await?;
        } else {
            self.reconcile_unpaid(&trip, &mut report).await?;
        }

        info!(trip = %trip_id, ?report, "edit reconciled");
        Ok(report)
    }

    /// The holder still matches `held` and its group still has room for it.
    async fn hold_still_valid(&self, holder: &TripId, held: &Trip) -> Result<bool, MatchError> {
        let Some(h) = self.store.get_trip(holder).await? else {
            return Ok(false);
        };
        let matches = proper_match_known(h.radii(), held.radii(), held.stored_distances(holder));
        let fits = match &h.trip_group_id {
            Some(gid) => self
                .store
                .get_group(gid)
                .await?
                .is_some_and(|g| g.has_room_for(held.seat_count)),
            None => false,
        };
        Ok(matches && fits)
    }

    /// Release `holder`'s hold on `held`, demote the pair, and let the holder
    /// pick again.
    async fn break_hold(
        &self,
        holder: &TripId,
        held: &TripId,
        report: &mut ReconcileReport,
    ) -> Result<(), MatchError> {
        self.reservations().release(holder, held).await?;
        report.holds_released += 1;

        let h = self.load(holder).await?;
        let t = self.load(held).await?;
        let proper = t
            .stored_distances(holder)
            .is_some_and(|d| proper_match(h.radii(), t.radii(), d));
        if let Some(rel) = t.matched(holder) {
            self.store
                .update_trip(
                    held,
                    &[
                        TripMutation::UpsertPotential(rel.clone().demote(proper)),
                        TripMutation::RefreshStatus,
                    ],
                )
                .await?;
            report.demoted += 1;
        }
        if let Some(rel) = h.matched(held) {
            self.store
                .update_trip(holder, &[TripMutation::UpsertPotential(rel.clone().demote(proper))])
                .await?;
        }
        debug!(holder = %holder, held = %held, "hold no longer valid");

        let outcome = self.allocator().reselect_or_dissolve(holder).await?;
        debug!(holder = %holder, ?outcome, "holder reselected");
        Ok(())
    }

    async fn reconcile_paid(
        &self,
        trip: &Trip,
        report: &mut ReconcileReport,
    ) -> Result<(), MatchError> {
        let Some(gid) = trip.trip_group_id.clone() else {
            return Ok(());
        };
        let held: Vec<TripId> = trip
            .matched_trips
            .iter()
            .filter(|r| r.reserving)
            .map(|r| r.trip_id.clone())
            .collect();
        for target in held {
            let t = self.load(&target).await?;
            if !self.hold_still_valid(&trip.trip_id, &t).await? {
                self.break_hold(&trip.trip_id, &target, report).await?;
            }
        }

        self.allocator().refresh_group(&gid).await?;
        report.groups_refreshed += 1;
        Ok(())
    }

    async fn reconcile_unpaid(
        &self,
        trip: &Trip,
        report: &mut ReconcileReport,
    ) -> Result<(), MatchError> {
        let mut groups: BTreeSet<TripGroupId> = BTreeSet::new();

        for cp in trip.counterpart_ids() {
            let Some(x) = self.store.get_trip(&cp).await? else {
                continue;
            };
            if x.is_paid() {
                groups.extend(x.trip_group_id.clone());
                continue;
            }
            let Some(distances) = trip.stored_distances(&cp) else {
                continue;
            };

            let holder = match x.reserving_trip_id.as_ref().filter(|h| *h != &trip.trip_id) {
                Some(h) => self.store.get_trip(h).await?.map(|h| PeerView {
                    distances: trip.stored_distances(&h.trip_id),
                    trip_id: h.trip_id.clone(),
                    radii: h.radii(),
                }),
                None => None,
            };

            let current = self.load(&trip.trip_id).await?;

            // The edited trip's own holder must also match the counterpart.
            let newcomer_holder = match current.reserving_trip_id.as_ref().filter(|h| *h != &cp) {
                Some(h) => self.store.get_trip(h).await?.map(|h| PeerView {
                    distances: x
                        .stored_distances(&h.trip_id)
                        .or_else(|| h.stored_distances(&cp)),
                    trip_id: h.trip_id.clone(),
                    radii: h.radii(),
                }),
                None => None,
            };
            let context = ClassifyContext {
                holder,
                group: None,
                newcomer_holder,
            };

            let outcome = classify(&current, &x, distances, &context);
            let was = current.relation_kind(&cp);
            let now = match outcome {
                MatchOutcome::MutualMatch | MatchOutcome::NewcomerHeld { .. } => {
                    RelationKind::Matched
                }
                _ => RelationKind::Potential,
            };
            let was_mutual = current.matched(&cp).map(|r| r.mutual);
            let was_proper = current.potential(&cp).map(|r| r.proper_match);
            let unchanged = match (&outcome, was) {
                (MatchOutcome::MutualMatch, Some(RelationKind::Matched)) => {
                    was_mutual == Some(true)
                }
                (MatchOutcome::NewcomerHeld { .. }, Some(RelationKind::Matched)) => {
                    was_mutual == Some(false)
                        && x.potential(&current.trip_id)
                            .is_some_and(|r| r.reserving_trip_obstruction)
                }
                (MatchOutcome::Potential { proper_match, .. }, Some(RelationKind::Potential)) => {
                    was_proper == Some(*proper_match)
                }
                (MatchOutcome::HeldByReservation { .. }, Some(RelationKind::Potential)) => {
                    was_proper == Some(true)
                }
                _ => false,
            };
            if unchanged {
                continue;
            }

            let writes = relation_writes(&current, &x, distances, &outcome);
            self.store.update_trip(&current.trip_id, &writes.newcomer).await?;
            self.store.update_trip(&cp, &writes.candidate).await?;
            match (was, now) {
                (Some(RelationKind::Matched), RelationKind::Potential) => report.demoted += 1,
                (Some(RelationKind::Potential), RelationKind::Matched) => report.promoted += 1,
                _ => {}
            }
            debug!(trip = %trip.trip_id, counterpart = %cp, ?outcome, "relation reclassified");
        }

        for gid in groups {
            self.allocator().refresh_group(&gid).await?;
            report.groups_refreshed += 1;
        }
        self.store
            .update_trip(&trip.trip_id, &[TripMutation::RefreshStatus])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TripStatus;
    use crate::geometry::PairDistances;
    use crate::matcher::allocator::AllocationOutcome;
    use crate::matcher::fixtures::*;
    use crate::store::MemoryTripStore;

    fn d(p: f64, q: f64) -> PairDistances {
        PairDistances::new(p, q)
    }

    async fn edit_radius(store: &MemoryTripStore, name: &str, radius: f64) -> (Trip, Trip) {
        let before = stored(store, name).await;
        let mut after = before.clone();
        after.pickup.radius = radius;
        after.destination.radius = radius;
        store.put_trip(after.clone()).await.unwrap();
        (before, after)
    }

    async fn pay(store: &MemoryTripStore, tiebreak: &Tiebreaker, name: &str) -> AllocationOutcome {
        store
            .update_trip(&id(name), &[TripMutation::SetStatus(TripStatus::Paid)])
            .await
            .unwrap();
        Allocator::new(store, tiebreak, 3)
            .on_trip_paid(&id(name))
            .await
            .unwrap()
    }

    #[test]
    fn only_radii_and_seats_matter() {
        let a = trip("a", 2500.0, 1);
        let mut b = a.clone();
        b.status = TripStatus::Matched;
        b.reserved = true;
        assert!(!affects_matching(&a, &b));
        b.seat_count = 2;
        assert!(affects_matching(&a, &b));
    }

    #[tokio::test]
    async fn engine_writes_are_ignored() {
        let store = MemoryTripStore::new();
        let tiebreak = Tiebreaker::new(Some(1));
        let a = trip("a", 2500.0, 1);
        put_all(&store, &[&a]).await;
        let mut after = a.clone();
        after.status = TripStatus::Matched;

        let report = Reconciler::new(&store, &tiebreak, 3)
            .on_trip_updated(&a, &after)
            .await
            .unwrap();
        assert!(report.is_noop());
    }

    #[tokio::test]
    async fn shrinking_radius_demotes_both_sides() {
        let store = MemoryTripStore::new();
        let tiebreak = Tiebreaker::new(Some(1));
        let a = trip("a", 2500.0, 1);
        let b = trip("b", 2000.0, 1);
        put_all(&store, &[&a, &b]).await;
        link_matched(&store, &a, &b, d(4000.0, 3900.0)).await;

        let (before, after) = edit_radius(&store, "a", 1000.0).await;
        let report = Reconciler::new(&store, &tiebreak, 3)
            .on_trip_updated(&before, &after)
            .await
            .unwrap();
        assert_eq!(report.demoted, 1);
        assert_eq!(report.snapshots_updated, 1);

        let a_now = stored(&store, "a").await;
        let rel = a_now.potential(&id("b")).unwrap();
        assert!(!rel.proper_match);
        assert_eq!(rel.snapshot.distances(), d(4000.0, 3900.0));
        assert_eq!(a_now.status, TripStatus::Unmatched);

        let b_now = stored(&store, "b").await;
        let rel = b_now.potential(&id("a")).unwrap();
        assert_eq!(rel.snapshot.pickup_radius, 1000.0);
        assert_eq!(b_now.status, TripStatus::Unmatched);
    }

    #[tokio::test]
    async fn growing_radius_promotes_potential() {
        let store = MemoryTripStore::new();
        let tiebreak = Tiebreaker::new(Some(1));
        let a = trip("a", 2500.0, 1);
        let b = trip("b", 2000.0, 1);
        put_all(&store, &[&a, &b]).await;
        link_potential(&store, &a, &b, d(5200.0, 3900.0), false).await;

        let (before, after) = edit_radius(&store, "a", 3500.0).await;
        let report = Reconciler::new(&store, &tiebreak, 3)
            .on_trip_updated(&before, &after)
            .await
            .unwrap();
        assert_eq!(report.promoted, 1);
        assert_eq!(stored(&store, "a").await.status, TripStatus::Matched);
        assert_eq!(stored(&store, "b").await.status, TripStatus::Matched);
    }

    #[tokio::test]
    async fn held_trip_growing_radius_respects_its_holder() {
        let store = MemoryTripStore::new();
        let tiebreak = Tiebreaker::new(Some(1));
        let m = trip("m", 2500.0, 1);
        let t = trip("t", 2500.0, 1);
        let x = trip("x", 2500.0, 1);
        put_all(&store, &[&m, &t, &x]).await;
        link_matched(&store, &m, &t, d(3000.0, 3000.0)).await;
        pay(&store, &tiebreak, "m").await;
        assert_eq!(stored(&store, "t").await.reserving_trip_id, Some(id("m")));
        link_potential(&store, &t, &x, d(5200.0, 5200.0), false).await;

        // 3000 + 2500 clears 5200 + 150, but m has never been measured against x.
        let (before, after) = edit_radius(&store, "t", 3000.0).await;
        Reconciler::new(&store, &tiebreak, 3)
            .on_trip_updated(&before, &after)
            .await
            .unwrap();

        let x_now = stored(&store, "x").await;
        assert!(x_now.matched(&id("t")).is_none());
        let rel = x_now.potential(&id("t")).unwrap();
        assert!(rel.proper_match);
        assert!(rel.reserving_trip_obstruction);
        assert!(!rel.mutual);

        let t_now = stored(&store, "t").await;
        assert!(!t_now.matched(&id("x")).unwrap().mutual);
        assert!(t_now.potential(&id("x")).is_none());
        assert_eq!(t_now.reserving_trip_id, Some(id("m")));

        // Replaying the same edit leaves the pair alone.
        let report = Reconciler::new(&store, &tiebreak, 3)
            .on_trip_updated(&before, &after)
            .await
            .unwrap();
        assert_eq!(report.promoted, 0);
        assert_eq!(report.demoted, 0);
        assert_eq!(stored(&store, "x").await.potential(&id("t")), Some(rel));
    }

    #[tokio::test]
    async fn held_trip_edited_out_of_range_releases_and_reselects() {
        let store = MemoryTripStore::new();
        let tiebreak = Tiebreaker::new(Some(1));
        let m = trip("m", 2500.0, 1);
        let r = trip("r", 2500.0, 1);
        let s = trip("s", 2500.0, 1);
        put_all(&store, &[&m, &r, &s]).await;
        link_matched(&store, &m, &r, d(3000.0, 3000.0)).await;
        link_matched(&store, &m, &s, d(4000.0, 4000.0)).await;
        pay(&store, &tiebreak, "m").await;
        assert_eq!(stored(&store, "r").await.reserving_trip_id, Some(id("m")));

        let (before, after) = edit_radius(&store, "r", 100.0).await;
        let report = Reconciler::new(&store, &tiebreak, 3)
            .on_trip_updated(&before, &after)
            .await
            .unwrap();
        assert_eq!(report.holds_released, 1);

        let r_now = stored(&store, "r").await;
        assert!(!r_now.reserved);
        assert!(r_now.potential(&id("m")).is_some());
        assert_eq!(r_now.status, TripStatus::Unmatched);

        let s_now = stored(&store, "s").await;
        assert_eq!(s_now.reserving_trip_id, Some(id("m")));
        let m_now = stored(&store, "m").await;
        assert!(m_now.matched(&id("s")).unwrap().reserving);
        assert!(m_now.potential(&id("r")).is_some());
    }

    #[tokio::test]
    async fn held_trip_edited_with_no_replacement_dissolves_group() {
        let store = MemoryTripStore::new();
        let tiebreak = Tiebreaker::new(Some(1));
        let m = trip("m", 2500.0, 1);
        let r = trip("r", 2500.0, 1);
        put_all(&store, &[&m, &r]).await;
        link_matched(&store, &m, &r, d(3000.0, 3000.0)).await;
        pay(&store, &tiebreak, "m").await;

        let (before, after) = edit_radius(&store, "r", 100.0).await;
        Reconciler::new(&store, &tiebreak, 3)
            .on_trip_updated(&before, &after)
            .await
            .unwrap();

        let gid = TripGroupId::founded_by(&id("m"));
        assert!(store.get_group(&gid).await.unwrap().is_none());
        let m_now = stored(&store, "m").await;
        assert_eq!(m_now.status, TripStatus::Unmatched);
        assert_eq!(m_now.trip_group_id, None);
        let r_now = stored(&store, "r").await;
        assert!(!r_now.reserved);
        assert!(!r_now.potential(&id("m")).unwrap().paid);
    }
}
