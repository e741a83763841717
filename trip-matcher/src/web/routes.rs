//! HTTP route handlers.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::domain::{
    DomainError, Endpoint, InvalidId, Trip, TripGroup, TripGroupId, TripId, TripStatus,
};
use crate::events::{EventError, TripEvent};
use crate::ledger::TripMutation;
use crate::store::{StoreError, TripStore};

use super::dto::*;
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/trips/:trip_id", put(put_trip).get(get_trip))
        .route("/trips/:trip_id/pay", post(pay_trip))
        .route("/groups/:group_id", get(get_group))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// Create a trip, or edit the rider-owned fields of an existing one.
///
/// Returns 202: matching runs after the response.
async fn put_trip(
    State(state): State<AppState>,
    Path(trip_id): Path<String>,
    Json(req): Json<TripRequest>,
) -> Result<(StatusCode, Json<Trip>), AppError> {
    let trip_id = TripId::new(trip_id)?;

    let (before, after) = match state.store.get_trip(&trip_id).await? {
        None => {
            let trip = req.into_trip(trip_id)?;
            let before = state.store.put_trip(trip.clone()).await?;
            (before, trip)
        }
        Some(existing) => {
            if existing.user_id != req.user_id {
                return Err(AppError::Conflict {
                    message: format!("trip {trip_id} belongs to another user"),
                });
            }
            // Stored distances and candidate filters are tied to the ride.
            if moves_ride(&existing, &req) {
                return Err(AppError::Conflict {
                    message: format!(
                        "pickup, destination and window of trip {trip_id} cannot change"
                    ),
                });
            }
            // Group seat totals are fixed once a trip has paid.
            if existing.is_paid() && existing.seat_count != req.seat_count {
                return Err(AppError::Conflict {
                    message: format!("seat count of paid trip {trip_id} cannot change"),
                });
            }
            let after = state
                .store
                .update_trip(
                    &trip_id,
                    &[TripMutation::SetRide {
                        pickup: req.pickup,
                        destination: req.destination,
                        seat_count: req.seat_count,
                        window: req.window,
                    }],
                )
                .await?;
            (Some(existing), after)
        }
    };

    publish(&state, before.as_ref(), &after).await?;
    Ok((StatusCode::ACCEPTED, Json(after)))
}

/// Whether `req` changes anything other than radii and seats.
fn moves_ride(existing: &Trip, req: &TripRequest) -> bool {
    let moved =
        |from: &Endpoint, to: &Endpoint| from.location != to.location || from.city != to.city;
    moved(&existing.pickup, &req.pickup)
        || moved(&existing.destination, &req.destination)
        || existing.window != req.window
}

/// Mark a trip as paid. Paying twice is a no-op.
async fn pay_trip(
    State(state): State<AppState>,
    Path(trip_id): Path<String>,
) -> Result<(StatusCode, Json<Trip>), AppError> {
    let trip_id = TripId::new(trip_id)?;
    let existing = state
        .store
        .get_trip(&trip_id)
        .await?
        .ok_or_else(|| AppError::NotFound {
            message: format!("trip {trip_id} not found"),
        })?;
    if existing.is_paid() {
        return Ok((StatusCode::OK, Json(existing)));
    }

    let after = state
        .store
        .update_trip(&trip_id, &[TripMutation::SetStatus(TripStatus::Paid)])
        .await?;
    publish(&state, Some(&existing), &after).await?;
    Ok((StatusCode::ACCEPTED, Json(after)))
}

async fn get_trip(
    State(state): State<AppState>,
    Path(trip_id): Path<String>,
) -> Result<Json<Trip>, AppError> {
    let trip_id = TripId::new(trip_id)?;
    state
        .store
        .get_trip(&trip_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound {
            message: format!("trip {trip_id} not found"),
        })
}

async fn get_group(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> Result<Json<TripGroup>, AppError> {
    let group_id = TripGroupId::new(group_id)?;
    state
        .store
        .get_group(&group_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound {
            message: format!("trip group {group_id} not found"),
        })
}

async fn publish(state: &AppState, before: Option<&Trip>, after: &Trip) -> Result<(), AppError> {
    for event in TripEvent::from_write(before, after) {
        state.events.enqueue(event).await?;
    }
    Ok(())
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    BadRequest { message: String },
    NotFound { message: String },
    Conflict { message: String },
    Internal { message: String },
}

impl From<InvalidId> for AppError {
    fn from(e: InvalidId) -> Self {
        AppError::BadRequest {
            message: e.to_string(),
        }
    }
}

impl From<DomainError> for AppError {
    fn from(e: DomainError) -> Self {
        AppError::BadRequest {
            message: e.to_string(),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        let message = e.to_string();
        match e {
            StoreError::NotFound { .. } => AppError::NotFound { message },
            StoreError::Invalid(_) => AppError::BadRequest { message },
            StoreError::AlreadyExists { .. } | StoreError::Ledger(_) => {
                AppError::Conflict { message }
            }
            StoreError::Unavailable { .. } | StoreError::Snapshot { .. } => {
                AppError::Internal { message }
            }
        }
    }
}

impl From<EventError> for AppError {
    fn from(e: EventError) -> Self {
        AppError::Internal {
            message: e.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::BadRequest { message } => (StatusCode::BAD_REQUEST, message),
            AppError::NotFound { message } => (StatusCode::NOT_FOUND, message),
            AppError::Conflict { message } => (StatusCode::CONFLICT, message),
            AppError::Internal { message } => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };

        if status.is_server_error() {
            error!(%status, %message, "request failed");
        } else {
            warn!(%status, %message, "request rejected");
        }

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::events::{WorkerConfig, spawn_worker};
    use crate::matcher::{MatchEngine, MatcherConfig};
    use crate::oracle::MockDistanceOracle;
    use crate::store::MemoryTripStore;
    use crate::web::AppState;

    fn app() -> (Router, Arc<MemoryTripStore>) {
        let store = Arc::new(MemoryTripStore::new());
        let engine = Arc::new(MatchEngine::new(
            store.clone(),
            Arc::new(MockDistanceOracle::new()),
            MatcherConfig::default().with_rng_seed(1),
        ));
        let (events, _worker) = spawn_worker(engine, WorkerConfig::default());
        (create_router(AppState::new(store.clone(), events)), store)
    }

    fn ride(user: &str, lat: f64, seats: u8) -> Value {
        json!({
            "user_id": user,
            "pickup": {"location": {"lat": lat, "lng": 3.3}, "radius": 2500.0, "city": "Lagos"},
            "destination": {"location": {"lat": lat, "lng": 3.5}, "radius": 2500.0, "city": "Lagos"},
            "seat_count": seats,
            "window": {
                "start": "2025-06-01T08:00:00Z",
                "end": "2025-06-01T10:00:00Z",
                "is_time_fixed": false
            }
        })
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(b) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    /// Poll until `check` accepts the response body.
    async fn eventually(app: &Router, uri: &str, check: impl Fn(&Value) -> bool) -> Value {
        let mut last = Value::Null;
        for _ in 0..100 {
            let (status, body) = send(app, "GET", uri, None).await;
            if status == StatusCode::OK && check(&body) {
                return body;
            }
            last = body;
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached for {uri}, last body: {last}");
    }

    #[tokio::test]
    async fn health_check() {
        let (app, _) = app();
        let (status, _) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn create_and_fetch_trip() {
        let (app, store) = app();
        let (status, body) = send(&app, "PUT", "/trips/t1", Some(ride("u1", 6.5, 1))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["trip_id"], "t1");
        assert_eq!(body["status"], "unmatched");
        assert_eq!(store.trip_count().await, 1);

        let (status, body) = send(&app, "GET", "/trips/t1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user_id"], "u1");
    }

    #[tokio::test]
    async fn rejects_invalid_requests() {
        let (app, _) = app();

        let (status, body) = send(&app, "PUT", "/trips/t1", Some(ride("u1", 6.5, 5))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("seat count"));

        let (status, _) = send(&app, "PUT", "/trips/a%20b", Some(ride("u1", 6.5, 1))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, "PUT", "/trips/t2", Some(ride("u1", 95.0, 1))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_records() {
        let (app, _) = app();
        let (status, body) = send(&app, "GET", "/trips/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "trip nope not found");

        let (status, _) = send(&app, "POST", "/trips/nope/pay", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, "GET", "/groups/group-nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn edit_by_another_user_is_rejected() {
        let (app, _) = app();
        send(&app, "PUT", "/trips/t1", Some(ride("u1", 6.5, 1))).await;
        let (status, _) = send(&app, "PUT", "/trips/t1", Some(ride("u2", 6.5, 1))).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn moving_a_trip_is_rejected() {
        let (app, store) = app();
        send(&app, "PUT", "/trips/t1", Some(ride("u1", 6.5, 1))).await;

        let (status, body) = send(&app, "PUT", "/trips/t1", Some(ride("u1", 6.6, 1))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("cannot change"));

        let mut renamed = ride("u1", 6.5, 1);
        renamed["destination"]["city"] = json!("Ibadan");
        let (status, _) = send(&app, "PUT", "/trips/t1", Some(renamed)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let mut later = ride("u1", 6.5, 1);
        later["window"]["end"] = json!("2025-06-01T11:00:00Z");
        let (status, _) = send(&app, "PUT", "/trips/t1", Some(later)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let stored = store.get_trip(&TripId::new("t1").unwrap()).await.unwrap().unwrap();
        assert_eq!(stored.pickup.location.lat, 6.5);

        let mut wider = ride("u1", 6.5, 2);
        wider["pickup"]["radius"] = json!(3000.0);
        let (status, body) = send(&app, "PUT", "/trips/t1", Some(wider)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["pickup"]["radius"], 3000.0);
        assert_eq!(body["seat_count"], 2);
    }

    #[tokio::test]
    async fn nearby_trips_are_matched() {
        let (app, _) = app();
        send(&app, "PUT", "/trips/t1", Some(ride("u1", 6.5, 1))).await;
        send(&app, "PUT", "/trips/t2", Some(ride("u2", 6.51, 1))).await;

        let t2 = eventually(&app, "/trips/t2", |b| b["status"] == "matched").await;
        assert_eq!(t2["matched_trips"][0]["trip_id"], "t1");
        eventually(&app, "/trips/t1", |b| b["status"] == "matched").await;
    }

    #[tokio::test]
    async fn paying_founds_a_group() {
        let (app, _) = app();
        send(&app, "PUT", "/trips/t1", Some(ride("u1", 6.5, 2))).await;

        let (status, body) = send(&app, "POST", "/trips/t1/pay", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "paid");

        let (status, _) = send(&app, "POST", "/trips/t1/pay", None).await;
        assert_eq!(status, StatusCode::OK);

        let group = eventually(&app, "/groups/group-t1", |_| true).await;
        assert_eq!(group["total_seat_count"], 2);

        let (status, _) = send(&app, "PUT", "/trips/t1", Some(ride("u1", 6.5, 3))).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }
}
