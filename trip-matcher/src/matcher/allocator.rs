//! Trip group allocation at payment time.
//!
//! A paying trip joins the smallest reachable group it can be admitted to,
//! or founds a new one. Admission needs a proper match with every member and
//! enough free seats; anything else is recorded on the group as a potential
//! member with the reasons it is blocked.

use std::collections::{BTreeSet, HashSet};

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};

use super::classify::{PeerView, obstructed_relation};
use super::error::MatchError;
use super::reservation::{HoldOutcome, Reservations};
use super::tiebreak::Tiebreaker;
use crate::domain::{
    GroupMember, MatchedRelation, ObstructingMember, PotentialGroupMember, PotentialRelation, Trip,
    TripGroup, TripGroupId, TripId,
};
use crate::geometry::{overlap_gaps, proper_match};
use crate::ledger::{GroupMutation, LedgerError, TripMutation};
use crate::store::{StoreError, TripStore};

/// Check whether `joiner` can join `group`.
///
/// `members` carries each member's radii and its distances to the joiner. A
/// member missing from `members`, or with unknown distances, makes the entry
/// unknown rather than passing.
pub fn evaluate_admission(
    joiner: &Trip,
    group: &TripGroup,
    members: &[PeerView],
) -> PotentialGroupMember {
    let mut entry = PotentialGroupMember {
        trip_id: joiner.trip_id.clone(),
        obstructing_trip_members: Vec::new(),
        trip_obstruction: false,
        seat_obstruction: !group.has_room_for(joiner.seat_count),
        seat_count: joiner.seat_count,
        unknown_trip_obstruction: false,
    };

    for member in &group.trip_group_members {
        if member.trip_id == joiner.trip_id {
            continue;
        }
        let view = members.iter().find(|v| v.trip_id == member.trip_id);
        match view.and_then(|v| v.distances.map(|d| (v.radii, d))) {
            None => {
                entry.unknown_trip_obstruction = true;
                entry.obstructing_trip_members.push(ObstructingMember {
                    trip_id: member.trip_id.clone(),
                    pickup_overlap_gap: None,
                    destination_overlap_gap: None,
                    unknown: true,
                });
            }
            Some((radii, d)) if !proper_match(joiner.radii(), radii, d) => {
                let gaps = overlap_gaps(joiner.radii(), radii, Some(d));
                entry.trip_obstruction = true;
                entry.obstructing_trip_members.push(ObstructingMember {
                    trip_id: member.trip_id.clone(),
                    pickup_overlap_gap: gaps.pickup,
                    destination_overlap_gap: gaps.destination,
                    unknown: false,
                });
            }
            Some(_) => {}
        }
    }
    entry
}

/// Member views built from the relations `trip` already records.
pub(crate) fn views_from_relations(trip: &Trip, group: &TripGroup) -> Vec<PeerView> {
    group
        .trip_group_members
        .iter()
        .filter_map(|m| {
            let snapshot = trip
                .matched(&m.trip_id)
                .map(|r| r.snapshot)
                .or_else(|| trip.potential(&m.trip_id).map(|r| r.snapshot))?;
            Some(PeerView {
                trip_id: m.trip_id.clone(),
                radii: snapshot.radii(),
                distances: Some(snapshot.distances()),
            })
        })
        .collect()
}

/// Where a paying trip ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum AllocationOutcome {
    AlreadyMember(TripGroupId),
    /// Joined the group of the trip that held it.
    JoinedHolderGroup(TripGroupId),
    JoinedExisting(TripGroupId),
    CreatedGroup {
        group_id: TripGroupId,
        hold: Option<TripId>,
    },
}

impl AllocationOutcome {
    pub fn group_id(&self) -> &TripGroupId {
        match self {
            AllocationOutcome::AlreadyMember(g)
            | AllocationOutcome::JoinedHolderGroup(g)
            | AllocationOutcome::JoinedExisting(g)
            | AllocationOutcome::CreatedGroup { group_id: g, .. } => g,
        }
    }
}

pub(crate) struct Allocator<'a, S> {
    store: &'a S,
    tiebreak: &'a Tiebreaker,
    retries: u32,
}

impl<'a, S: TripStore> Allocator<'a, S> {
    pub(crate) fn new(store: &'a S, tiebreak: &'a Tiebreaker, retries: u32) -> Self {
        Self {
            store,
            tiebreak,
            retries,
        }
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

    /// Place a paying trip in a group.
    pub(crate) async fn on_trip_paid(
        &self,
        trip_id: &TripId,
    ) -> Result<AllocationOutcome, MatchError> {
        let mut trip = self.load(trip_id).await?;

        if let Some(gid) = &trip.trip_group_id {
            if let Some(group) = self.store.get_group(gid).await? {
                if group.is_member(trip_id) {
                    return Ok(AllocationOutcome::AlreadyMember(gid.clone()));
                }
            }
        }

        if let Some(holder_id) = trip.reserving_trip_id.clone() {
            let holder_group = match self.store.get_trip(&holder_id).await? {
                Some(h) => match &h.trip_group_id {
                    Some(gid) => self.store.get_group(gid).await?,
                    None => None,
                },
                None => None,
            };
            self.reservations().release(&holder_id, trip_id).await?;
            trip = self.load(trip_id).await?;

            if let Some(group) = holder_group {
                let entry = evaluate_admission(&trip, &group, &views_from_relations(&trip, &group));
                if entry.is_admissible() {
                    match self.join(&trip, &group.group_id).await {
                        Ok(()) => {
                            return Ok(AllocationOutcome::JoinedHolderGroup(group.group_id));
                        }
                        Err(MatchError::Store(StoreError::Ledger(LedgerError::CapacityExceeded {
                            ..
                        }))) => {
                            debug!(trip = %trip_id, group = %group.group_id, "holder group filled up");
                        }
                        Err(e) => return Err(e),
                    }
                }
                self.reselect_or_dissolve(&holder_id).await?;
                trip = self.load(trip_id).await?;
            }
        }

        let mut excluded = HashSet::new();
        for _ in 0..=self.retries {
            let Some(gid) = self.choose_group(&trip, &excluded).await? else {
                break;
            };
            match self.join(&trip, &gid).await {
                Ok(()) => return Ok(AllocationOutcome::JoinedExisting(gid)),
                Err(MatchError::Store(StoreError::Ledger(LedgerError::CapacityExceeded { .. }))) => {
                    debug!(trip = %trip_id, group = %gid, "group filled up, choosing again");
                    excluded.insert(gid);
                    trip = self.load(trip_id).await?;
                }
                Err(e) => return Err(e),
            }
        }

        self.found(&trip).await
    }

    /// Pick among the groups reachable through paid matched relations.
    async fn choose_group(
        &self,
        trip: &Trip,
        excluded: &HashSet<TripGroupId>,
    ) -> Result<Option<TripGroupId>, MatchError> {
        let reachable: BTreeSet<TripGroupId> = trip
            .matched_trips
            .iter()
            .filter(|r| r.paid)
            .filter_map(|r| r.trip_group_id.clone())
            .filter(|g| !excluded.contains(g))
            .collect();

        let mut admissible = Vec::new();
        for gid in reachable {
            let Some(group) = self.store.get_group(&gid).await? else {
                continue;
            };
            let views = views_from_relations(trip, &group);
            if !evaluate_admission(trip, &group, &views).is_admissible() {
                continue;
            }
            let distance: f64 = views
                .iter()
                .filter_map(|v| v.distances.map(|d| d.combined()))
                .sum();
            admissible.push((gid, group.member_count(), distance));
        }

        Ok(self
            .tiebreak
            .pick_min_by(admissible, |(_, members, distance)| (*members, *distance))
            .map(|(gid, _, _)| gid))
    }

    /// Add `trip` to an existing group and update everything that records it.
    async fn join(&self, trip: &Trip, gid: &TripGroupId) -> Result<(), MatchError> {
        let before = self
            .store
            .get_group(gid)
            .await?
            .ok_or_else(|| MatchError::Store(StoreError::group_not_found(gid)))?;
        let group = self
            .store
            .update_group(
                gid,
                &[GroupMutation::AddMember(GroupMember {
                    trip_id: trip.trip_id.clone(),
                    user_id: trip.user_id.clone(),
                    seat_count: trip.seat_count,
                    joined_at: Utc::now(),
                })],
            )
            .await?;
        info!(trip = %trip.trip_id, group = %gid, seats = group.total_seat_count, "joined group");

        if let Some(founder) = before.sole_member() {
            let founder_id = founder.trip_id.clone();
            if let Some(f) = self.store.get_trip(&founder_id).await? {
                let held: Vec<TripId> = f
                    .matched_trips
                    .iter()
                    .filter(|r| r.reserving && r.trip_id != trip.trip_id)
                    .map(|r| r.trip_id.clone())
                    .collect();
                for target in held {
                    self.reservations().release(&founder_id, &target).await?;
                }
            }
        }

        self.store
            .update_trip(
                &trip.trip_id,
                &[TripMutation::JoinGroup {
                    trip_group_id: gid.clone(),
                    total_seat_count: group.total_seat_count,
                }],
            )
            .await?;
        for member in group.member_ids() {
            self.store
                .update_trip(
                    &member,
                    &[TripMutation::SetGroupSeats {
                        total_seat_count: group.total_seat_count,
                    }],
                )
                .await?;
        }
        self.mark_counterparts(&trip.trip_id, Some(gid), Some(group.total_seat_count))
            .await?;
        self.refresh_group(gid).await?;
        Ok(())
    }

    async fn found(&self, trip: &Trip) -> Result<AllocationOutcome, MatchError> {
        let gid = TripGroupId::founded_by(&trip.trip_id);
        let group = TripGroup::new(
            gid.clone(),
            GroupMember {
                trip_id: trip.trip_id.clone(),
                user_id: trip.user_id.clone(),
                seat_count: trip.seat_count,
                joined_at: Utc::now(),
            },
        );
        match self.store.create_group(group).await {
            Ok(()) | Err(StoreError::AlreadyExists { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        info!(trip = %trip.trip_id, group = %gid, "founded group");

        self.store
            .update_trip(
                &trip.trip_id,
                &[TripMutation::JoinGroup {
                    trip_group_id: gid.clone(),
                    total_seat_count: trip.seat_count,
                }],
            )
            .await?;
        self.mark_counterparts(&trip.trip_id, Some(&gid), Some(trip.seat_count))
            .await?;
        self.refresh_group(&gid).await?;

        let hold = match self.reservations().reselect(&trip.trip_id).await? {
            HoldOutcome::Placed(t) | HoldOutcome::Kept(t) => Some(t),
            HoldOutcome::NoTarget | HoldOutcome::NotNeeded => None,
        };
        Ok(AllocationOutcome::CreatedGroup {
            group_id: gid,
            hold,
        })
    }

    async fn mark_counterparts(
        &self,
        trip_id: &TripId,
        gid: Option<&TripGroupId>,
        total: Option<u8>,
    ) -> Result<(), MatchError> {
        let trip = self.load(trip_id).await?;
        for cp in trip.counterpart_ids() {
            match self
                .store
                .update_trip(
                    &cp,
                    &[
                        TripMutation::SetCounterpartGroup {
                            trip_id: trip_id.clone(),
                            trip_group_id: gid.cloned(),
                            total_seat_count: total,
                        },
                        TripMutation::RefreshStatus,
                    ],
                )
                .await
            {
                Ok(_) => {}
                Err(StoreError::NotFound { .. }) => {
                    warn!(trip = %trip_id, counterpart = %cp, "counterpart record missing");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Recompute the group's potential members and the relations they imply.
    ///
    /// Every unpaid counterpart of a member is checked against the whole
    /// group. Admissible ones hold the members as matched; blocked ones hold
    /// them as potential with the obstruction details. When a sole member
    /// loses its hold here and finds no replacement, the group is dissolved.
    pub(crate) async fn refresh_group(
        &self,
        gid: &TripGroupId,
    ) -> Result<Option<TripGroup>, MatchError> {
        let Some(group) = self.store.get_group(gid).await? else {
            return Ok(None);
        };
        let members: Vec<Trip> = join_all(group.member_ids().iter().map(|m| self.store.get_trip(m)))
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .flatten()
            .collect();

        let mut outsiders: BTreeSet<TripId> = members
            .iter()
            .flat_map(Trip::counterpart_ids)
            .chain(group.potential_trip_members.iter().map(|p| p.trip_id.clone()))
            .collect();
        outsiders.retain(|id| !group.is_member(id));

        let mut group_writes = Vec::new();
        let mut released = false;
        for x_id in outsiders {
            let x = match self.store.get_trip(&x_id).await? {
                Some(x) if !x.is_paid() => x,
                _ => {
                    group_writes.push(GroupMutation::RemovePotentialMember(x_id));
                    continue;
                }
            };
            if !members.iter().any(|m| x.relation_kind(&m.trip_id).is_some()) {
                group_writes.push(GroupMutation::RemovePotentialMember(x_id));
                continue;
            }

            let entry = evaluate_admission(&x, &group, &views_from_relations(&x, &group));
            for member in &members {
                let Some(distances) = x.stored_distances(&member.trip_id) else {
                    continue;
                };
                let seen_by_x = member.snapshot(distances);
                let seen_by_member = x.snapshot(distances);
                let proper = proper_match(x.radii(), member.radii(), distances);

                let (x_side, member_side) = if entry.is_admissible() {
                    (
                        TripMutation::UpsertMatched(MatchedRelation {
                            paid: true,
                            trip_group_id: Some(gid.clone()),
                            ..MatchedRelation::new(member.trip_id.clone(), seen_by_x)
                        }),
                        TripMutation::UpsertMatched(MatchedRelation::new(
                            x_id.clone(),
                            seen_by_member,
                        )),
                    )
                } else {
                    if member.matched(&x_id).is_some_and(|r| r.reserving) {
                        released |= self.reservations().release(&member.trip_id, &x_id).await?;
                    }
                    (
                        TripMutation::UpsertPotential(obstructed_relation(
                            member, seen_by_x, proper, &entry,
                        )),
                        TripMutation::UpsertPotential(PotentialRelation::new(
                            x_id.clone(),
                            seen_by_member,
                            proper,
                        )),
                    )
                };
                self.store
                    .update_trip(&x_id, &[x_side, TripMutation::RefreshStatus])
                    .await?;
                self.store
                    .update_trip(&member.trip_id, &[member_side])
                    .await?;
            }
            group_writes.push(GroupMutation::UpsertPotentialMember(entry));
        }

        let group = self.store.update_group(gid, &group_writes).await?;
        debug!(group = %gid, potential = group.potential_trip_members.len(), "group refreshed");

        if released {
            if let Some(sole) = group.sole_member() {
                let sole = sole.trip_id.clone();
                self.reselect_or_dissolve(&sole).await?;
                return Ok(self.store.get_group(gid).await?);
            }
        }
        Ok(Some(group))
    }

    /// Re-run hold selection for a sole member, dissolving its group when
    /// nothing is left to hold.
    pub(crate) async fn reselect_or_dissolve(
        &self,
        holder: &TripId,
    ) -> Result<HoldOutcome, MatchError> {
        let outcome = self.reservations().reselect(holder).await?;
        if outcome == HoldOutcome::NoTarget {
            if let Some(gid) = self.load(holder).await?.trip_group_id {
                self.dissolve(&gid).await?;
            }
        }
        Ok(outcome)
    }

    /// Delete a group and return its members to the unpaid pool.
    pub(crate) async fn dissolve(&self, gid: &TripGroupId) -> Result<(), MatchError> {
        let Some(group) = self.store.get_group(gid).await? else {
            return Ok(());
        };
        for member_id in group.member_ids() {
            let Some(member) = self.store.get_trip(&member_id).await? else {
                continue;
            };
            for target in member.matched_trips.iter().filter(|r| r.reserving) {
                self.reservations().release(&member_id, &target.trip_id).await?;
            }
            let member = self
                .store
                .update_trip(&member_id, &[TripMutation::LeaveGroup])
                .await?;
            self.mark_counterparts(&member_id, None, None).await?;

            // Pairs blocked only by the group can match again.
            for cp in member.counterpart_ids() {
                let Some(x) = self.store.get_trip(&cp).await? else {
                    continue;
                };
                let Some(rel) = x.potential(&member_id) else {
                    continue;
                };
                if !rel.proper_match || rel.reserving_trip_obstruction || x.is_paid() {
                    continue;
                }
                self.store
                    .update_trip(
                        &cp,
                        &[
                            TripMutation::UpsertMatched(rel.clone().promote()),
                            TripMutation::RefreshStatus,
                        ],
                    )
                    .await?;
                if let Some(back) = member.potential(&cp) {
                    self.store
                        .update_trip(
                            &member_id,
                            &[
                                TripMutation::UpsertMatched(back.clone().promote()),
                                TripMutation::RefreshStatus,
                            ],
                        )
                        .await?;
                }
            }
        }
        self.store.delete_group(gid).await?;
        info!(group = %gid, "group dissolved");
        Ok(())
    }
}
