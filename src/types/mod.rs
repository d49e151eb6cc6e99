use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::{Duration, Instant};

use crate::error::{HaloError, HaloResult};
use crate::geo_math::{self, distance_meters};

/// One fix from the location source, as consumed by the alert and trip paths.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PositionSample {
    pub latitude: f64,
    pub longitude: f64,
    /// m/s, never negative; 0 when the device could not tell
    pub speed_mps: f64,
    pub timestamp: Instant,
}

impl PositionSample {
    pub fn new(latitude: f64, longitude: f64, speed_mps: f64, timestamp: Instant) -> Self {
        let speed_mps = if speed_mps.is_finite() && speed_mps > 0.0 {
            speed_mps
        } else {
            0.0
        };
        Self {
            latitude,
            longitude,
            speed_mps,
            timestamp,
        }
    }

    /// Build a sample from a speed given in km/h (handy for replays and tests)
    pub fn with_speed_kmh(latitude: f64, longitude: f64, speed_kmh: f64, timestamp: Instant) -> Self {
        Self::new(latitude, longitude, speed_kmh / geo_math::MPS_TO_KMH, timestamp)
    }

    pub fn speed_kmh(&self) -> f64 {
        geo_math::speed_kmh(self.speed_mps)
    }

    pub fn distance_to(&self, latitude: f64, longitude: f64) -> f64 {
        distance_meters(self.latitude, self.longitude, latitude, longitude)
    }

    pub fn has_valid_position(&self) -> bool {
        geo_math::is_valid_coordinate(self.latitude, self.longitude)
    }
}

/// Serialisable form of a fix, as written to recorded drive logs
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GpsFix {
    /// seconds, any epoch; only differences matter
    pub timestamp: f64,
    pub latitude: f64,
    pub longitude: f64,
    /// m/s
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub accuracy: Option<f64>,
}

impl GpsFix {
    /// Map the fix onto the monotonic clock, `epoch` standing for `epoch_ts`
    pub fn to_sample(&self, epoch: Instant, epoch_ts: f64) -> PositionSample {
        let offset = (self.timestamp - epoch_ts).max(0.0);
        PositionSample::new(
            self.latitude,
            self.longitude,
            self.speed.unwrap_or(0.0),
            epoch + Duration::from_secs_f64(offset),
        )
    }
}

/// Hazard category. The core only uses it for message text and default severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum HazardKind {
    SpeedCamera,
    SpeedBreaker,
    RedLight,
    Accident,
    Traffic,
    RoadBlock,
    PoliceCheck,
    Flood,
    Construction,
    BrokenSignal,
    Hazard,
    SchoolZone,
    HospitalZone,
    Other,
}

impl HazardKind {
    pub const ALL: [HazardKind; 14] = [
        HazardKind::SpeedCamera,
        HazardKind::SpeedBreaker,
        HazardKind::RedLight,
        HazardKind::Accident,
        HazardKind::Traffic,
        HazardKind::RoadBlock,
        HazardKind::PoliceCheck,
        HazardKind::Flood,
        HazardKind::Construction,
        HazardKind::BrokenSignal,
        HazardKind::Hazard,
        HazardKind::SchoolZone,
        HazardKind::HospitalZone,
        HazardKind::Other,
    ];

    /// Human readable label, used in spoken messages
    pub fn label(&self) -> &'static str {
        match self {
            HazardKind::SpeedCamera => "Speed Camera",
            HazardKind::SpeedBreaker => "Speed Breaker",
            HazardKind::RedLight => "Red Light",
            HazardKind::Accident => "Accident",
            HazardKind::Traffic => "Traffic",
            HazardKind::RoadBlock => "Road Block",
            HazardKind::PoliceCheck => "Police Check",
            HazardKind::Flood => "Flood",
            HazardKind::Construction => "Construction",
            HazardKind::BrokenSignal => "Broken Signal",
            HazardKind::Hazard => "Hazard",
            HazardKind::SchoolZone => "School Zone",
            HazardKind::HospitalZone => "Hospital Zone",
            HazardKind::Other => "Other",
        }
    }

    /// Parse a backend type tag. Case, '-', '_' and spaces are ignored;
    /// anything unrecognised is `Other`.
    pub fn parse(tag: &str) -> HazardKind {
        let key: String = tag
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .flat_map(char::to_lowercase)
            .collect();

        HazardKind::ALL
            .iter()
            .copied()
            .find(|kind| {
                kind.label()
                    .chars()
                    .filter(|c| *c != ' ')
                    .flat_map(char::to_lowercase)
                    .eq(key.chars())
            })
            .unwrap_or(HazardKind::Other)
    }

    /// Severity for markers that do not carry one (community reports)
    pub fn default_severity(&self) -> Severity {
        match self {
            HazardKind::Accident | HazardKind::Flood | HazardKind::RoadBlock => Severity::Critical,
            HazardKind::SpeedCamera
            | HazardKind::RedLight
            | HazardKind::PoliceCheck
            | HazardKind::SchoolZone
            | HazardKind::HospitalZone
            | HazardKind::SpeedBreaker => Severity::High,
            HazardKind::Construction | HazardKind::BrokenSignal | HazardKind::Hazard | HazardKind::Traffic => {
                Severity::Medium
            }
            HazardKind::Other => Severity::Low,
        }
    }
}

impl fmt::Display for HazardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<String> for HazardKind {
    fn from(tag: String) -> Self {
        HazardKind::parse(&tag)
    }
}

impl From<HazardKind> for String {
    fn from(kind: HazardKind) -> Self {
        kind.label().to_string()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn parse(tag: &str) -> Option<Severity> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
            Severity::Critical => "Critical",
        };
        f.write_str(s)
    }
}

/// Where a marker came from
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarkerSource {
    /// Operator-maintained fixed point
    AlertPoint {
        name: String,
        description: Option<String>,
    },
    /// Crowd-sourced report; expiry is enforced upstream
    Report {
        upvotes: u32,
        verified: bool,
        expires_at: Option<DateTime<Utc>>,
    },
}

/// Hazard marker, unified over alert points and reports
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HazardMarker {
    pub id: String,
    pub kind: HazardKind,
    pub latitude: f64,
    pub longitude: f64,
    /// km/h
    pub speed_limit: Option<u32>,
    pub trigger_radius_m: f64,
    pub severity: Severity,
    pub source: MarkerSource,
}

impl HazardMarker {
    pub fn is_report(&self) -> bool {
        matches!(self.source, MarkerSource::Report { .. })
    }

    pub fn distance_from(&self, latitude: f64, longitude: f64) -> f64 {
        distance_meters(latitude, longitude, self.latitude, self.longitude)
    }

    /// Reject markers the evaluator cannot reason about
    pub fn validate(&self) -> HaloResult<()> {
        if self.id.is_empty() {
            return Err(HaloError::InvalidMarker("empty id".to_string()));
        }
        if !geo_math::is_valid_coordinate(self.latitude, self.longitude) {
            return Err(HaloError::InvalidMarker(format!(
                "{}: bad coordinates ({}, {})",
                self.id, self.latitude, self.longitude
            )));
        }
        if !(self.trigger_radius_m.is_finite() && self.trigger_radius_m > 0.0) {
            return Err(HaloError::InvalidMarker(format!(
                "{}: bad trigger radius {}",
                self.id, self.trigger_radius_m
            )));
        }
        Ok(())
    }
}
