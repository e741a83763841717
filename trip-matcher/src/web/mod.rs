//! HTTP surface of the trip matcher.
//!
//! Riders create, edit and pay for trips here. Every accepted write is
//! turned into [`TripEvent`](crate::events::TripEvent)s and queued for the
//! matcher, so responses return before matching has run.

mod dto;
mod routes;
mod state;

pub use dto::*;
pub use routes::{AppError, create_router};
pub use state::AppState;
