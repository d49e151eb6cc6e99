pub mod stats;
pub mod storage;
pub mod tracker;

pub use stats::{average_speed_kmh, FinalizedTrip, TripAggregate, TripRecord};
pub use storage::{JsonTripStore, MemoryTripStore, TripStore};
pub use tracker::TripTracker;
