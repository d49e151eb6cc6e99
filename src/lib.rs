//! Proximity alerts and trip telemetry for a driver-safety app.
//!
//! A stream of position samples is checked against nearby hazard markers
//! (speed cameras, breakers, community reports); the nearest marker in range
//! raises a debounced alert, and the same stream feeds a trip tracker.

pub mod alerts;
pub mod config;
pub mod error;
pub mod geo_math;
pub mod live_status;
pub mod markers;
pub mod sensors;
pub mod session;
pub mod timer;
pub mod trip;
pub mod types;
pub mod units;


pub use config::HaloConfig;
pub use error::{HaloError, HaloResult};
pub use session::{SessionState, SessionSummary, TrackingSession};
