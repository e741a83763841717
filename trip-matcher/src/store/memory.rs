//! In-memory trip store with JSON snapshots.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::error::StoreError;
use super::{CandidateQuery, TripStore};
use crate::domain::{Trip, TripGroup, TripGroupId, TripId};
use crate::ledger::{self, GroupMutation, TripMutation};

#[derive(Debug, Default)]
struct Records {
    trips: HashMap<TripId, Trip>,
    groups: HashMap<TripGroupId, TripGroup>,
}

/// On-disk form of the store.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    trips: Vec<Trip>,
    groups: Vec<TripGroup>,
}

/// A [`TripStore`] that keeps every record in memory.
///
/// Each update takes the write lock for the duration of one record's
/// mutation list, so lists are atomic per record but two records are never
/// updated together.
#[derive(Debug, Clone, Default)]
pub struct MemoryTripStore {
    records: Arc<RwLock<Records>>,
}

impl MemoryTripStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn trip_count(&self) -> usize {
        self.records.read().await.trips.len()
    }

    pub async fn group_count(&self) -> usize {
        self.records.read().await.groups.len()
    }

    /// Load a store from a snapshot file.
    ///
    /// Returns an empty store if the file doesn't exist. Every record is
    /// validated on the way in.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no snapshot found, starting empty");
                return Ok(Self::new());
            }
            Err(e) => {
                return Err(StoreError::Snapshot {
                    message: format!("failed to read {}: {}", path.display(), e),
                });
            }
        };

        let snapshot: Snapshot =
            serde_json::from_str(&contents).map_err(|e| StoreError::Snapshot {
                message: format!("failed to parse {}: {}", path.display(), e),
            })?;

        let mut records = Records::default();
        for trip in snapshot.trips {
            trip.validate()?;
            records.trips.insert(trip.trip_id.clone(), trip);
        }
        for group in snapshot.groups {
            group.validate()?;
            records.groups.insert(group.group_id.clone(), group);
        }

        info!(
            trips = records.trips.len(),
            groups = records.groups.len(),
            "loaded snapshot"
        );
        Ok(Self {
            records: Arc::new(RwLock::new(records)),
        })
    }

    /// Write every record to a snapshot file.
    ///
    /// Creates parent directories if they don't exist.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        let snapshot = {
            let records = self.records.read().await;
            let mut trips: Vec<Trip> = records.trips.values().cloned().collect();
            let mut groups: Vec<TripGroup> = records.groups.values().cloned().collect();
            trips.sort_by(|a, b| a.trip_id.cmp(&b.trip_id));
            groups.sort_by(|a, b| a.group_id.cmp(&b.group_id));
            Snapshot { trips, groups }
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Snapshot {
                    message: format!("failed to create snapshot directory: {}", e),
                })?;
        }

        let json = serde_json::to_string_pretty(&snapshot).map_err(|e| StoreError::Snapshot {
            message: format!("failed to serialize snapshot: {}", e),
        })?;

        tokio::fs::write(path, json)
            .await
            .map_err(|e| StoreError::Snapshot {
                message: format!("failed to write {}: {}", path.display(), e),
            })?;

        debug!(path = %path.display(), "saved snapshot");
        Ok(())
    }
}

impl TripStore for MemoryTripStore {
    async fn get_trip(&self, id: &TripId) -> Result<Option<Trip>, StoreError> {
        Ok(self.records.read().await.trips.get(id).cloned())
    }

    async fn put_trip(&self, trip: Trip) -> Result<Option<Trip>, StoreError> {
        trip.validate()?;
        let mut records = self.records.write().await;
        Ok(records.trips.insert(trip.trip_id.clone(), trip))
    }

    async fn query_candidates(&self, query: &CandidateQuery) -> Result<Vec<Trip>, StoreError> {
        let records = self.records.read().await;
        let mut found: Vec<Trip> = records
            .trips
            .values()
            .filter(|t| query.matches(t))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.trip_id.cmp(&b.trip_id));
        Ok(found)
    }

    async fn update_trip(
        &self,
        id: &TripId,
        mutations: &[TripMutation],
    ) -> Result<Trip, StoreError> {
        let mut records = self.records.write().await;
        let current = records
            .trips
            .get_mut(id)
            .ok_or_else(|| StoreError::trip_not_found(id))?;

        let mut next = current.clone();
        ledger::apply_trip(&mut next, mutations)?;
        next.validate()?;
        *current = next.clone();
        Ok(next)
    }

    async fn get_group(&self, id: &TripGroupId) -> Result<Option<TripGroup>, StoreError> {
        Ok(self.records.read().await.groups.get(id).cloned())
    }

    async fn create_group(&self, group: TripGroup) -> Result<(), StoreError> {
        group.validate()?;
        let mut records = self.records.write().await;
        if records.groups.contains_key(&group.group_id) {
            return Err(StoreError::AlreadyExists {
                kind: "trip group",
                id: group.group_id.to_string(),
            });
        }
        records.groups.insert(group.group_id.clone(), group);
        Ok(())
    }

    async fn update_group(
        &self,
        id: &TripGroupId,
        mutations: &[GroupMutation],
    ) -> Result<TripGroup, StoreError> {
        let mut records = self.records.write().await;
        let current = records
            .groups
            .get_mut(id)
            .ok_or_else(|| StoreError::group_not_found(id))?;

        let mut next = current.clone();
        ledger::apply_group(&mut next, mutations)?;
        next.validate()?;
        *current = next.clone();
        Ok(next)
    }

    async fn delete_group(&self, id: &TripGroupId) -> Result<(), StoreError> {
        self.records.write().await.groups.remove(id);
        Ok(())
    }
}
