//! Application state for the web layer.

use std::sync::Arc;

use crate::events::EventQueue;
use crate::store::MemoryTripStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Trip and group records
    pub store: Arc<MemoryTripStore>,

    /// Queue feeding the matcher worker
    pub events: EventQueue,
}

impl AppState {
    pub fn new(store: Arc<MemoryTripStore>, events: EventQueue) -> Self {
        Self { store, events }
    }
}
