use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tokio::time::Duration;

use crate::error::{HaloError, HaloResult};
use crate::units::SpeedUnit;

/// Timing and distance constants of the alert and trip engines
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Trigger radius for markers that do not specify one (meters)
    pub alert_radius_m: f64,
    /// Radius of the vicinity query sent to the backend (meters)
    pub query_radius_m: f64,
    /// Re-query once the device moved this far from the last query center
    pub requery_distance_m: f64,
    /// Re-query at least this often; 0 disables the interval policy
    pub requery_interval_secs: u64,
    pub debounce_cooldown_ms: u64,
    pub alert_display_ms: u64,
    pub idle_timeout_secs: u64,
    pub motion_threshold_kmh: f64,
    pub min_trip_distance_m: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            alert_radius_m: 150.0,
            query_radius_m: 1500.0,
            requery_distance_m: 500.0,
            requery_interval_secs: 60,
            debounce_cooldown_ms: 3000,
            alert_display_ms: 5000,
            idle_timeout_secs: 30,
            motion_threshold_kmh: 3.0,
            min_trip_distance_m: 5.0,
        }
    }
}

impl EngineConfig {
    pub fn debounce_cooldown(&self) -> Duration {
        Duration::from_millis(self.debounce_cooldown_ms)
    }

    pub fn alert_display(&self) -> Duration {
        Duration::from_millis(self.alert_display_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn requery_interval(&self) -> Option<Duration> {
        (self.requery_interval_secs > 0).then(|| Duration::from_secs(self.requery_interval_secs))
    }

    pub fn validate(&self) -> HaloResult<()> {
        let positive = [
            ("alert_radius_m", self.alert_radius_m),
            ("query_radius_m", self.query_radius_m),
            ("requery_distance_m", self.requery_distance_m),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(HaloError::Config(format!("{name} must be positive, got {value}")));
            }
        }
        if self.query_radius_m < self.alert_radius_m {
            return Err(HaloError::Config(format!(
                "query_radius_m ({}) smaller than alert_radius_m ({})",
                self.query_radius_m, self.alert_radius_m
            )));
        }
        if !(self.motion_threshold_kmh >= 0.0 && self.min_trip_distance_m >= 0.0) {
            return Err(HaloError::Config("thresholds must not be negative".to_string()));
        }
        Ok(())
    }
}

/// User-facing alert preferences
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AlertSettings {
    pub audio_alerts: bool,
    pub voice_alerts: bool,
    pub vibration: bool,
    pub speed_unit: SpeedUnit,
    pub alert_volume: f32,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            audio_alerts: true,
            voice_alerts: true,
            vibration: true,
            speed_unit: SpeedUnit::Kmh,
            alert_volume: 0.8,
        }
    }
}

/// Hazard backend endpoint
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub points_radius_m: f64,
    pub reports_radius_m: f64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            timeout_secs: 10,
            points_radius_m: 1500.0,
            reports_radius_m: 5000.0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HaloConfig {
    pub engine: EngineConfig,
    pub alerts: AlertSettings,
    pub backend: BackendConfig,
}

impl HaloConfig {
    /// Load from a JSON file. A missing file gives the defaults; fields absent
    /// from the file keep their default values.
    pub fn load(path: &Path) -> HaloResult<Self> {
        if !path.exists() {
            log::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        let config: HaloConfig = serde_json::from_str(&text)?;
        config.engine.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> HaloResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_engine_constants() {
        let engine = EngineConfig::default();
        assert_eq!(engine.debounce_cooldown(), Duration::from_secs(3));
        assert_eq!(engine.alert_display(), Duration::from_secs(5));
        assert_eq!(engine.idle_timeout(), Duration::from_secs(30));
        assert_eq!(engine.motion_threshold_kmh, 3.0);
        assert_eq!(engine.min_trip_distance_m, 5.0);
        assert!(engine.validate().is_ok());
    }

    #[test]
    fn test_partial_json_merges_over_defaults() {
        let json = r#"{ "alerts": { "voiceAlerts": false }, "engine": { "alert_radius_m": 200.0 } }"#;
        let config: HaloConfig = serde_json::from_str(json).unwrap();
        assert!(!config.alerts.voice_alerts);
        assert!(config.alerts.audio_alerts);
        assert_eq!(config.engine.alert_radius_m, 200.0);
        assert_eq!(config.engine.query_radius_m, 1500.0);
        assert_eq!(config.backend, BackendConfig::default());
    }

    #[test]
    fn test_validate_rejects_bad_radius() {
        let mut engine = EngineConfig::default();
        engine.alert_radius_m = -1.0;
        assert!(engine.validate().is_err());

        let mut engine = EngineConfig::default();
        engine.query_radius_m = 100.0;
        assert!(engine.validate().is_err());
    }

    #[test]
    fn test_interval_zero_disables() {
        let mut engine = EngineConfig::default();
        assert_eq!(engine.requery_interval(), Some(Duration::from_secs(60)));
        engine.requery_interval_secs = 0;
        assert_eq!(engine.requery_interval(), None);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("highway_halo_missing_config_does_not_exist.json");
        let config = HaloConfig::load(&path).unwrap();
        assert_eq!(config, HaloConfig::default());
    }

    #[test]
    fn test_save_then_load() {
        let path = std::env::temp_dir().join(format!("highway_halo_config_{}.json", std::process::id()));
        let mut config = HaloConfig::default();
        config.alerts.speed_unit = SpeedUnit::Mph;
        config.save(&path).unwrap();
        let loaded = HaloConfig::load(&path).unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!(loaded.alerts.speed_unit, SpeedUnit::Mph);
    }
}
