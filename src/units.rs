use serde::{Deserialize, Serialize};

const KMH_TO_MPH: f64 = 0.621371;
const METERS_TO_MILES: f64 = 0.000621371;

/// Display unit for speeds and distances
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedUnit {
    #[default]
    Kmh,
    Mph,
}

impl SpeedUnit {
    pub fn convert_speed(&self, kmh: f64) -> f64 {
        match self {
            SpeedUnit::Kmh => kmh,
            SpeedUnit::Mph => kmh * KMH_TO_MPH,
        }
    }

    pub fn format_speed(&self, kmh: f64) -> String {
        match self {
            SpeedUnit::Kmh => format!("{} km/h", kmh.round()),
            SpeedUnit::Mph => format!("{} mph", (kmh * KMH_TO_MPH).round()),
        }
    }

    pub fn format_distance(&self, meters: f64) -> String {
        match self {
            SpeedUnit::Kmh => format!("{:.2} km", meters / 1000.0),
            SpeedUnit::Mph => format!("{:.2} mi", meters * METERS_TO_MILES),
        }
    }
}

/// "1h 5m" / "12m"
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}
