use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo_math::MPS_TO_KMH;

/// Persisted summary of one finished trip
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripRecord {
    pub date: DateTime<Utc>,
    pub distance_meters: f64,
    pub duration_seconds: u64,
    pub avg_speed_kmh: f64,
}

/// Everything a finalized trip contributes to the lifetime aggregate
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FinalizedTrip {
    pub record: TripRecord,
    pub max_speed_kmh: f64,
    pub alert_count: u32,
}

/// Average speed in km/h; 0 for a zero duration
pub fn average_speed_kmh(distance_m: f64, duration_secs: u64) -> f64 {
    if duration_secs == 0 {
        return 0.0;
    }
    distance_m / duration_secs as f64 * MPS_TO_KMH
}

/// Lifetime statistics, updated by merging each new trip into the previous
/// totals (the history is never re-read to compute them)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TripAggregate {
    pub total_trips: u32,
    pub total_distance_meters: f64,
    pub total_duration_seconds: u64,
    pub max_speed_kmh: f64,
    pub avg_speed_kmh: f64,
    pub alerts_received: u64,
    /// Oldest first
    pub trips: Vec<TripRecord>,
}

impl TripAggregate {
    pub fn merge(&mut self, trip: &FinalizedTrip) {
        self.total_trips += 1;
        self.total_distance_meters += trip.record.distance_meters;
        self.total_duration_seconds += trip.record.duration_seconds;
        self.max_speed_kmh = self.max_speed_kmh.max(trip.max_speed_kmh);
        self.alerts_received += u64::from(trip.alert_count);
        self.avg_speed_kmh = average_speed_kmh(self.total_distance_meters, self.total_duration_seconds);
        self.trips.push(trip.record.clone());
    }

    /// Most recent trips, newest first
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &TripRecord> {
        self.trips.iter().rev().take(n)
    }
}
