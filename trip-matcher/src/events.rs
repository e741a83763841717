//! Trip events and the worker that feeds them to the engine.
//!
//! A record write produces zero or more [`TripEvent`]s. Each event runs as
//! its own task; retryable failures are redelivered with backoff, which is
//! safe because every engine write is idempotent.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::{Trip, TripId};
use crate::matcher::{EventOutcome, MatchEngine, MatchError, affects_matching};
use crate::oracle::DistanceOracle;
use crate::store::TripStore;

/// Something that happened to a trip record.
#[derive(Debug, Clone, PartialEq)]
pub enum TripEvent {
    Created(Trip),
    Updated { before: Trip, after: Trip },
    Paid(Trip),
}

impl TripEvent {
    pub fn trip_id(&self) -> &TripId {
        match self {
            TripEvent::Created(t) | TripEvent::Paid(t) => &t.trip_id,
            TripEvent::Updated { after, .. } => &after.trip_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TripEvent::Created(_) => "created",
            TripEvent::Updated { .. } => "updated",
            TripEvent::Paid(_) => "paid",
        }
    }

    /// Events implied by writing `after` over `before`.
    pub fn from_write(before: Option<&Trip>, after: &Trip) -> Vec<TripEvent> {
        let Some(before) = before else {
            return vec![TripEvent::Created(after.clone())];
        };
        let mut events = Vec::new();
        if affects_matching(before, after) {
            events.push(TripEvent::Updated {
                before: before.clone(),
                after: after.clone(),
            });
        }
        if !before.is_paid() && after.is_paid() {
            events.push(TripEvent::Paid(after.clone()));
        }
        events
    }
}

/// Event worker settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Events buffered before `enqueue` waits.
    pub queue_depth: usize,

    /// Deliveries per event, including the first.
    pub max_attempts: u32,

    /// Delay before the first redelivery (milliseconds). Doubles each time.
    pub backoff_ms: u64,
}

impl WorkerConfig {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_depth: 1024,
            max_attempts: 5,
            backoff_ms: 500,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("event queue is closed")]
    Closed,
}

/// Sending side of the event worker.
#[derive(Debug, Clone)]
pub struct EventQueue {
    tx: mpsc::Sender<TripEvent>,
}

impl EventQueue {
    pub async fn enqueue(&self, event: TripEvent) -> Result<(), EventError> {
        debug!(trip = %event.trip_id(), kind = event.kind(), "event queued");
        self.tx.send(event).await.map_err(|_| EventError::Closed)
    }
}

/// Run `event` until it succeeds, fails for good, or runs out of attempts.
pub async fn process_event<S, O>(
    engine: &MatchEngine<S, O>,
    event: &TripEvent,
    config: &WorkerConfig,
) -> Result<EventOutcome, MatchError>
where
    S: TripStore,
    O: DistanceOracle,
{
    let mut attempt = 1;
    loop {
        match engine.handle(event).await {
            Ok(outcome) => return Ok(outcome),
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                let delay = config.backoff() * 2u32.saturating_pow(attempt - 1);
                warn!(
                    trip = %event.trip_id(),
                    kind = event.kind(),
                    attempt,
                    error = %e,
                    "event failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Start the worker. Each received event is handled in its own task.
pub fn spawn_worker<S, O>(
    engine: Arc<MatchEngine<S, O>>,
    config: WorkerConfig,
) -> (EventQueue, JoinHandle<()>)
where
    S: TripStore,
    O: DistanceOracle,
{
    let (tx, mut rx) = mpsc::channel::<TripEvent>(config.queue_depth.max(1));
    let config = Arc::new(config);

    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let engine = engine.clone();
            let config = config.clone();
            tokio::spawn(async move {
                let trip = event.trip_id().clone();
                let kind = event.kind();
                match process_event(&engine, &event, &config).await {
                    Ok(outcome) => debug!(trip = %trip, kind, ?outcome, "event handled"),
                    Err(MatchError::NoCandidatesFound(_)) => {
                        info!(trip = %trip, kind, "no candidates, trip left unmatched");
                    }
                    Err(e) => error!(trip = %trip, kind, error = %e, "event failed"),
                }
            });
        }
        info!("event worker stopped");
    });

    (EventQueue { tx }, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Endpoint, LatLng, TimeWindow, TripStatus, UserId};
    use crate::matcher::MatcherConfig;
    use crate::oracle::MockDistanceOracle;
    use crate::store::MemoryTripStore;
    use chrono::{TimeZone, Utc};

    fn trip(id: &str, lat: f64) -> Trip {
        Trip::new(
            TripId::new(id).unwrap(),
            UserId::new(format!("u-{id}")).unwrap(),
            Endpoint::new(LatLng::new(lat, 3.3).unwrap(), 2500.0, "Lagos"),
            Endpoint::new(LatLng::new(lat, 3.5).unwrap(), 2500.0, "Lagos"),
            1,
            TimeWindow::fixed(Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap()),
        )
    }

    fn engine() -> (
        Arc<MatchEngine<MemoryTripStore, MockDistanceOracle>>,
        Arc<MemoryTripStore>,
        Arc<MockDistanceOracle>,
    ) {
        let store = Arc::new(MemoryTripStore::new());
        let oracle = Arc::new(MockDistanceOracle::new());
        let config = MatcherConfig::new(625, 9_850.0, 3, 0, 1).with_rng_seed(5);
        (
            Arc::new(MatchEngine::new(store.clone(), oracle.clone(), config)),
            store,
            oracle,
        )
    }

    #[test]
    fn events_from_writes() {
        let a = trip("a", 6.5);
        assert_eq!(TripEvent::from_write(None, &a), vec![TripEvent::Created(a.clone())]);

        let mut matched = a.clone();
        matched.status = TripStatus::Matched;
        assert!(TripEvent::from_write(Some(&a), &matched).is_empty());

        let mut paid = matched.clone();
        paid.status = TripStatus::Paid;
        assert_eq!(
            TripEvent::from_write(Some(&matched), &paid),
            vec![TripEvent::Paid(paid.clone())]
        );

        let mut wider = paid.clone();
        wider.pickup.radius = 4000.0;
        let events = TripEvent::from_write(Some(&paid), &wider);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind(), "updated");
    }

    #[tokio::test]
    async fn retryable_failures_are_redelivered() {
        let (engine, store, oracle) = engine();
        let a = trip("a", 6.5);
        let b = trip("b", 6.6);
        oracle
            .set_distance(a.pickup.location, b.pickup.location, 500.0)
            .await;
        oracle
            .set_distance(a.destination.location, b.destination.location, 500.0)
            .await;
        store.put_trip(b.clone()).await.unwrap();
        store.put_trip(a.clone()).await.unwrap();
        oracle.fail_next(2);

        let config = WorkerConfig::default()
            .with_max_attempts(3)
            .with_backoff(Duration::from_millis(1));
        let outcome = process_event(&engine, &TripEvent::Created(a.clone()), &config)
            .await
            .unwrap();
        assert!(matches!(outcome, EventOutcome::Matched(r) if r.matched == 1));
        assert_eq!(oracle.call_count(), 4);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let (engine, store, oracle) = engine();
        let a = trip("a", 6.5);
        let b = trip("b", 6.6);
        store.put_trip(b).await.unwrap();
        store.put_trip(a.clone()).await.unwrap();
        oracle.fail_next(10);

        let config = WorkerConfig::default()
            .with_max_attempts(2)
            .with_backoff(Duration::from_millis(1));
        let err = process_event(&engine, &TripEvent::Created(a), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, MatchError::OracleUnavailable(_)));
        assert_eq!(oracle.call_count(), 2);
    }

    #[tokio::test]
    async fn worker_processes_queued_events() {
        let (engine, store, oracle) = engine();
        let a = trip("a", 6.5);
        let b = trip("b", 6.6);
        oracle
            .set_distance(a.pickup.location, b.pickup.location, 500.0)
            .await;
        oracle
            .set_distance(a.destination.location, b.destination.location, 500.0)
            .await;
        store.put_trip(b).await.unwrap();
        store.put_trip(a.clone()).await.unwrap();

        let (queue, _worker) = spawn_worker(engine, WorkerConfig::default());
        queue.enqueue(TripEvent::Created(a)).await.unwrap();

        let id = TripId::new("a").unwrap();
        let mut status = TripStatus::Unmatched;
        for _ in 0..100 {
            status = store.get_trip(&id).await.unwrap().unwrap().status;
            if status == TripStatus::Matched {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, TripStatus::Matched);
    }
}
