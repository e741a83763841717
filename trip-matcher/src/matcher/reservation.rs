//! Holds placed by a forming group's sole member.
//!
//! While a group has one member, that member reserves its closest committed
//! counterpart so nobody else takes it. Placing a hold blocks every other
//! trip that matches the target but not the holder; releasing it unblocks
//! them again. No other module claims or releases holds.

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::error::MatchError;
use super::tiebreak::Tiebreaker;
use crate::domain::{Trip, TripId};
use crate::geometry::proper_match_known;
use crate::ledger::{LedgerError, TripMutation};
use crate::store::{StoreError, TripStore};

/// Result of re-running hold selection for a trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HoldOutcome {
    /// The trip is not the sole member of a group.
    NotNeeded,
    /// The trip already holds this target.
    Kept(TripId),
    Placed(TripId),
    /// Nothing left to hold.
    NoTarget,
}

pub(crate) struct Reservations<'a, S> {
    store: &'a S,
    tiebreak: &'a Tiebreaker,
    retries: u32,
}

impl<'a, S: TripStore> Reservations<'a, S> {
    pub(crate) fn new(store: &'a S, tiebreak: &'a Tiebreaker, retries: u32) -> Self {
        Self {
            store,
            tiebreak,
            retries,
        }
    }

    /// The counterpart `holder` should reserve, if any.
    ///
    /// Only relations showing commitment qualify: a mutual match, or a
    /// proper potential the counterpart records as matched. The counterpart
    /// must be unpaid, fit in `remaining_seats`, and not be held by another
    /// trip.
    pub(crate) async fn select_target(
        &self,
        holder: &Trip,
        remaining_seats: u8,
    ) -> Result<Option<TripId>, MatchError> {
        let committed = holder
            .matched_trips
            .iter()
            .filter(|r| r.mutual && !r.paid)
            .map(|r| (r.trip_id.clone(), r.snapshot))
            .chain(
                holder
                    .potential_trips
                    .iter()
                    .filter(|r| !r.mutual && r.proper_match && !r.paid)
                    .map(|r| (r.trip_id.clone(), r.snapshot)),
            )
            .filter(|(_, s)| s.seat_count <= remaining_seats)
            .collect::<Vec<_>>();

        let records = join_all(committed.iter().map(|(id, _)| self.store.get_trip(id))).await;
        let mut available = Vec::new();
        for ((id, snapshot), record) in committed.into_iter().zip(records) {
            let Some(trip) = record? else {
                continue;
            };
            let free = trip
                .reserving_trip_id
                .as_ref()
                .is_none_or(|h| h == &holder.trip_id);
            if free && !trip.is_paid() {
                available.push((id, snapshot.distances().combined()));
            }
        }

        Ok(self
            .tiebreak
            .pick_min_by(available, |(_, combined)| *combined)
            .map(|(id, _)| id))
    }

    /// Reserve `target` for `holder` and block trips that do not match the holder.
    pub(crate) async fn place(&self, holder: &Trip, target: &TripId) -> Result<(), MatchError> {
        let holder_id = &holder.trip_id;
        let current = self
            .store
            .get_trip(target)
            .await?
            .ok_or_else(|| MatchError::TripNotFound(target.clone()))?;

        let mut target_side = vec![TripMutation::ClaimHold {
            holder: holder_id.clone(),
        }];
        match current.potential(holder_id) {
            Some(p) => target_side.push(TripMutation::UpsertMatched(p.clone().promote())),
            None => target_side.push(TripMutation::SetMutual {
                trip_id: holder_id.clone(),
                mutual: true,
            }),
        }
        target_side.push(TripMutation::RefreshStatus);

        let mut holder_side = Vec::new();
        if let Some(p) = holder.potential(target) {
            holder_side.push(TripMutation::UpsertMatched(p.clone().promote()));
        } else if holder.matched(target).is_none() {
            return Err(MatchError::StaleReservationState(holder_id.clone()));
        }
        holder_side.extend([
            TripMutation::SetMutual {
                trip_id: target.clone(),
                mutual: true,
            },
            TripMutation::SetReserving {
                trip_id: target.clone(),
                reserving: true,
            },
            TripMutation::RefreshStatus,
        ]);

        let claimed = self.store.update_trip(target, &target_side).await?;
        if let Err(e) = self.store.update_trip(holder_id, &holder_side).await {
            if let Err(undo) = self
                .store
                .update_trip(
                    target,
                    &[TripMutation::ReleaseHold {
                        holder: holder_id.clone(),
                    }],
                )
                .await
            {
                warn!(holder = %holder_id, target = %target, error = %undo, "failed to undo hold claim");
            }
            return Err(e.into());
        }
        info!(holder = %holder_id, target = %target, "hold placed");

        let blocked: Vec<TripId> = claimed
            .matched_trips
            .iter()
            .filter(|r| &r.trip_id != holder_id && !r.paid)
            .filter(|r| {
                !proper_match_known(
                    holder.radii(),
                    r.snapshot.radii(),
                    holder.stored_distances(&r.trip_id),
                )
            })
            .map(|r| r.trip_id.clone())
            .collect();

        for x_id in blocked {
            let Some(x) = self.store.get_trip(&x_id).await? else {
                continue;
            };
            let Some(rel) = x.matched(target) else {
                continue;
            };
            let mut demoted = rel.clone().demote(true);
            demoted.reserving_trip_obstruction = true;
            demoted.mutual = false;
            self.store
                .update_trip(
                    &x_id,
                    &[TripMutation::UpsertPotential(demoted), TripMutation::RefreshStatus],
                )
                .await?;
            self.store
                .update_trip(
                    target,
                    &[TripMutation::SetMutual {
                        trip_id: x_id.clone(),
                        mutual: false,
                    }],
                )
                .await?;
            debug!(trip = %x_id, target = %target, "blocked by hold");
        }
        Ok(())
    }

    /// Free `target` from `holder`'s hold and unblock trips it obstructed.
    ///
    /// Returns false when the target is gone or held by another trip.
    pub(crate) async fn release(
        &self,
        holder: &TripId,
        target: &TripId,
    ) -> Result<bool, MatchError> {
        let freed = match self
            .store
            .update_trip(
                target,
                &[TripMutation::ReleaseHold {
                    holder: holder.clone(),
                }],
            )
            .await
        {
            Ok(t) => Some(t),
            Err(StoreError::NotFound { .. }) => None,
            Err(StoreError::Ledger(LedgerError::Stale { reason, .. })) => {
                warn!(holder = %holder, target = %target, reason, "hold already moved");
                None
            }
            Err(e) => return Err(e.into()),
        };

        match self
            .store
            .update_trip(
                holder,
                &[TripMutation::SetReserving {
                    trip_id: target.clone(),
                    reserving: false,
                }],
            )
            .await
        {
            Ok(_) | Err(StoreError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        let Some(freed) = freed else {
            return Ok(false);
        };
        info!(holder = %holder, target = %target, "hold released");
        self.unblock(&freed).await?;
        Ok(true)
    }

    async fn unblock(&self, freed: &Trip) -> Result<(), MatchError> {
        let target = &freed.trip_id;
        for x_id in freed.counterpart_ids() {
            let Some(x) = self.store.get_trip(&x_id).await? else {
                continue;
            };
            let Some(rel) = x.potential(target).filter(|r| r.reserving_trip_obstruction) else {
                continue;
            };

            if rel.proper_match && !rel.paid {
                self.store
                    .update_trip(
                        &x_id,
                        &[
                            TripMutation::UpsertMatched(rel.clone().promote()),
                            TripMutation::RefreshStatus,
                        ],
                    )
                    .await?;
                let freed_side = match freed.potential(&x_id) {
                    Some(p) => TripMutation::UpsertMatched(p.clone().promote()),
                    None => TripMutation::SetMutual {
                        trip_id: x_id.clone(),
                        mutual: true,
                    },
                };
                self.store
                    .update_trip(target, &[freed_side, TripMutation::RefreshStatus])
                    .await?;
                debug!(trip = %x_id, target = %target, "unblocked and matched");
            } else {
                self.store
                    .update_trip(
                        &x_id,
                        &[TripMutation::SetReservingObstruction {
                            trip_id: target.clone(),
                            obstructed: false,
                        }],
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Make sure `holder_id` holds something if it is a sole group member.
    pub(crate) async fn reselect(&self, holder_id: &TripId) -> Result<HoldOutcome, MatchError> {
        let mut attempt = 0;
        loop {
            let Some(holder) = self.store.get_trip(holder_id).await? else {
                return Ok(HoldOutcome::NotNeeded);
            };
            let Some(group_id) = &holder.trip_group_id else {
                return Ok(HoldOutcome::NotNeeded);
            };
            let Some(group) = self.store.get_group(group_id).await? else {
                return Ok(HoldOutcome::NotNeeded);
            };
            if group.sole_member().is_none_or(|m| &m.trip_id != holder_id) {
                return Ok(HoldOutcome::NotNeeded);
            }
            if let Some(held) = holder.matched_trips.iter().find(|r| r.reserving) {
                return Ok(HoldOutcome::Kept(held.trip_id.clone()));
            }

            let Some(target) = self.select_target(&holder, group.remaining_seats()).await? else {
                return Ok(HoldOutcome::NoTarget);
            };
            match self.place(&holder, &target).await {
                Ok(()) => return Ok(HoldOutcome::Placed(target)),
                Err(MatchError::StaleReservationState(_)) if attempt < self.retries => {
                    attempt += 1;
                    debug!(holder = %holder_id, target = %target, attempt, "hold target changed, reselecting");
                }
                Err(e) => return Err(e),
            }
        }
    }
}
