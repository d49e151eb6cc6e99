use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Alert as shown on the dashboard feed
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AlertStatus {
    pub marker_id: String,
    pub kind: String,
    pub severity: String,
    pub distance_meters: u32,
    pub speed_violation: bool,
    pub message: String,
}

/// Snapshot of a running session, written periodically for external tools
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub uptime_seconds: u64,
    pub samples_processed: u64,
    // Last fix
    pub gps_lat: f64,
    pub gps_lon: f64,
    pub speed_kmh: f64,
    // Markers
    pub markers_loaded: usize,
    pub marker_generation: u64,
    pub active_alert: Option<AlertStatus>,
    pub alerts_fired: u64,
    pub alerts_suppressed: u64,
    // Trip
    pub trip_active: bool,
    pub trip_distance_m: f64,
    pub trip_max_speed_kmh: f64,
}

impl LiveStatus {
    pub fn new() -> Self {
        Self {
            timestamp: current_timestamp(),
            ..Self::default()
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
