//! Trip matching server.
//!
//! Pairs ride requests whose pickup and drop-off tolerance radii overlap on
//! both legs, and forms paid trips into shared-ride groups of up to four
//! seats.

pub mod cache;
pub mod domain;
pub mod events;
pub mod geometry;
pub mod ledger;
pub mod matcher;
pub mod oracle;
pub mod store;
pub mod web;
