//! Geofence attendance engine for patrolling security agents.
//!
//! Position samples are classified against circular round zones and turned
//! into arrival and departure check-ins that drive each assignment through
//! its lifecycle. Periodic jobs close out expired assignments and raise
//! deduplicated alerts.

pub mod alerts;
pub mod attendance;
pub mod cli;
pub mod config;
pub mod error;
pub mod geofence;
pub mod ingest;
pub mod lifecycle;
pub mod logging;
pub mod model;
pub mod scheduler;
pub mod seed;
pub mod store;
pub mod sweep;
pub mod ui;

pub use error::{PatrolError, Result, StoreError};
