use chrono::{DateTime, Utc};
use tokio::time::{Duration, Instant};

use super::stats::{average_speed_kmh, FinalizedTrip, TripRecord};
use crate::config::EngineConfig;
use crate::geo_math::distance_meters;
use crate::timer::Deadline;
use crate::types::PositionSample;

/// Accumulates distance and speed over the sample stream.
///
/// # States
/// - Idle: no trip yet (`started_at` is `None`)
/// - Active: moving, distance and max speed accumulate
/// - Paused: `active` is false after the idle timer ran out; start time and
///   totals are kept and motion resumes the same trip
///
/// The previous position is updated on every sample, moving or not, so a
/// resumed trip adds only the step from the last fix.
pub struct TripTracker {
    motion_threshold_kmh: f64,
    min_distance_m: f64,
    idle_timeout: Duration,

    started_at: Option<Instant>,
    active: bool,
    last_position: Option<(f64, f64)>,
    total_distance_m: f64,
    max_speed_kmh: f64,
    alert_count: u32,
    idle_timer: Deadline,
}

impl TripTracker {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            motion_threshold_kmh: config.motion_threshold_kmh,
            min_distance_m: config.min_trip_distance_m,
            idle_timeout: config.idle_timeout(),
            started_at: None,
            active: false,
            last_position: None,
            total_distance_m: 0.0,
            max_speed_kmh: 0.0,
            alert_count: 0,
            idle_timer: Deadline::new(),
        }
    }

    pub fn on_sample(&mut self, sample: &PositionSample) {
        let now = sample.timestamp;
        // The gap since the previous sample may already cover the idle timeout
        self.poll_idle(now);

        let speed_kmh = sample.speed_kmh();
        if speed_kmh > self.motion_threshold_kmh {
            if !self.active {
                self.active = true;
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                    log::debug!("Trip started");
                } else {
                    log::debug!("Trip resumed");
                }
            }
            self.idle_timer.cancel();
        } else if self.active && !self.idle_timer.is_armed() {
            self.idle_timer.arm(now, self.idle_timeout);
        }

        if !sample.has_valid_position() {
            return;
        }

        if self.active {
            if let Some((lat, lon)) = self.last_position {
                self.total_distance_m += distance_meters(lat, lon, sample.latitude, sample.longitude);
            }
            self.max_speed_kmh = self.max_speed_kmh.max(speed_kmh);
        }
        self.last_position = Some((sample.latitude, sample.longitude));
    }

    pub fn record_alert(&mut self) {
        self.alert_count += 1;
    }

    /// Pause the trip if the idle timer ran out. Returns true when it did.
    pub fn poll_idle(&mut self, now: Instant) -> bool {
        if self.idle_timer.fire_if_due(now) {
            self.active = false;
            log::debug!("Trip paused after {:?} idle", self.idle_timeout);
            return true;
        }
        false
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.idle_timer.when()
    }

    /// Close the trip when the sample stream stops.
    ///
    /// Trips shorter than the minimum distance are dropped. Either way all
    /// state is reset.
    pub fn finalize(&mut self, now: Instant, date: DateTime<Utc>) -> Option<FinalizedTrip> {
        let distance = self.total_distance_m;
        let started_at = self.started_at;
        let max_speed_kmh = self.max_speed_kmh;
        let alert_count = self.alert_count;
        self.reset();

        if distance < self.min_distance_m {
            log::info!("Discarding trip of {:.1} m", distance);
            return None;
        }

        let duration_seconds = started_at
            .map(|start| now.saturating_duration_since(start).as_secs())
            .unwrap_or(0);
        let record = TripRecord {
            date,
            distance_meters: distance,
            duration_seconds,
            avg_speed_kmh: average_speed_kmh(distance, duration_seconds),
        };
        log::info!(
            "Trip finished: {:.0} m in {} s, avg {:.1} km/h, max {:.1} km/h, {} alerts",
            record.distance_meters,
            record.duration_seconds,
            record.avg_speed_kmh,
            max_speed_kmh,
            alert_count
        );

        Some(FinalizedTrip {
            record,
            max_speed_kmh,
            alert_count,
        })
    }

    fn reset(&mut self) {
        self.started_at = None;
        self.active = false;
        self.last_position = None;
        self.total_distance_m = 0.0;
        self.max_speed_kmh = 0.0;
        self.alert_count = 0;
        self.idle_timer.cancel();
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn total_distance_m(&self) -> f64 {
        self.total_distance_m
    }

    pub fn max_speed_kmh(&self) -> f64 {
        self.max_speed_kmh
    }

    pub fn alert_count(&self) -> u32 {
        self.alert_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_math::offset_meters;
    use approx::assert_abs_diff_eq;

    const ORIGIN: (f64, f64) = (30.8600959, 75.8610409);

    fn sample(t0: Instant, secs: u64, north_m: f64, kmh: f64) -> PositionSample {
        let (lat, lon) = offset_meters(ORIGIN.0, ORIGIN.1, north_m, 0.0);
        PositionSample::with_speed_kmh(lat, lon, kmh, t0 + Duration::from_secs(secs))
    }

    fn tracker() -> TripTracker {
        TripTracker::new(&EngineConfig::default())
    }

    #[test]
    fn test_accumulates_distance_and_max_speed() {
        let t0 = Instant::now();
        let mut t = tracker();
        t.on_sample(&sample(t0, 0, 0.0, 36.0));
        t.on_sample(&sample(t0, 10, 100.0, 54.0));
        t.on_sample(&sample(t0, 20, 200.0, 45.0));

        assert!(t.is_active());
        assert_eq!(t.started_at(), Some(t0));
        assert_abs_diff_eq!(t.total_distance_m(), 200.0, epsilon = 0.5);
        assert_abs_diff_eq!(t.max_speed_kmh(), 54.0, epsilon = 1e-9);
    }

    #[test]
    fn test_motion_threshold_is_exclusive() {
        let t0 = Instant::now();
        let mut t = tracker();
        t.on_sample(&sample(t0, 0, 0.0, 3.0));
        assert!(!t.is_active());
        assert!(t.started_at().is_none());
        t.on_sample(&sample(t0, 1, 1.0, 3.1));
        assert!(t.is_active());
    }

    #[test]
    fn test_idle_timer_pauses_without_reset() {
        let t0 = Instant::now();
        let mut t = tracker();
        t.on_sample(&sample(t0, 0, 0.0, 40.0));
        t.on_sample(&sample(t0, 5, 50.0, 0.0));
        assert_eq!(t.next_deadline(), Some(t0 + Duration::from_secs(35)));

        // Further slow samples do not push the deadline out
        t.on_sample(&sample(t0, 20, 50.0, 1.0));
        assert_eq!(t.next_deadline(), Some(t0 + Duration::from_secs(35)));

        assert!(!t.poll_idle(t0 + Duration::from_secs(34)));
        assert!(t.poll_idle(t0 + Duration::from_secs(35)));
        assert!(!t.is_active());
        assert_eq!(t.started_at(), Some(t0));
        assert_abs_diff_eq!(t.total_distance_m(), 50.0, epsilon = 0.5);
    }

    #[test]
    fn test_motion_cancels_idle_timer() {
        let t0 = Instant::now();
        let mut t = tracker();
        t.on_sample(&sample(t0, 0, 0.0, 40.0));
        t.on_sample(&sample(t0, 5, 10.0, 0.0));
        t.on_sample(&sample(t0, 25, 20.0, 20.0));
        assert!(t.next_deadline().is_none());
        assert!(!t.poll_idle(t0 + Duration::from_secs(60)));
        assert!(t.is_active());
    }

    #[test]
    fn test_resume_adds_only_last_step() {
        let t0 = Instant::now();
        let mut t = tracker();
        t.on_sample(&sample(t0, 0, 0.0, 40.0));
        t.on_sample(&sample(t0, 5, 50.0, 0.0));
        // Long gap: the idle deadline passed before this sample arrived
        t.on_sample(&sample(t0, 100, 60.0, 0.0));
        assert!(!t.is_active());
        // Drift while paused is not counted
        t.on_sample(&sample(t0, 110, 70.0, 2.0));
        assert_abs_diff_eq!(t.total_distance_m(), 50.0, epsilon = 0.5);

        t.on_sample(&sample(t0, 120, 100.0, 30.0));
        assert!(t.is_active());
        assert_eq!(t.started_at(), Some(t0));
        assert_abs_diff_eq!(t.total_distance_m(), 80.0, epsilon = 0.5);
    }

    #[test]
    fn test_finalize_persists_and_resets() {
        let t0 = Instant::now();
        let mut t = tracker();
        t.on_sample(&sample(t0, 0, 0.0, 36.0));
        t.on_sample(&sample(t0, 100, 1000.0, 36.0));
        t.record_alert();

        let trip = t.finalize(t0 + Duration::from_secs(100), Utc::now()).unwrap();
        assert_abs_diff_eq!(trip.record.distance_meters, 1000.0, epsilon = 1.0);
        assert_eq!(trip.record.duration_seconds, 100);
        assert_abs_diff_eq!(trip.record.avg_speed_kmh, 36.0, epsilon = 0.05);
        assert_eq!(trip.alert_count, 1);

        assert!(t.started_at().is_none());
        assert_eq!(t.total_distance_m(), 0.0);
        assert_eq!(t.alert_count(), 0);
    }

    #[test]
    fn test_short_trip_discarded() {
        let t0 = Instant::now();
        let mut t = tracker();
        t.on_sample(&sample(t0, 0, 0.0, 10.0));
        t.on_sample(&sample(t0, 1, 3.0, 10.0));
        assert!(t.finalize(t0 + Duration::from_secs(2), Utc::now()).is_none());
        assert_eq!(t.total_distance_m(), 0.0);
    }

    #[test]
    fn test_zero_duration_average() {
        let t0 = Instant::now();
        let mut t = tracker();
        t.on_sample(&sample(t0, 0, 0.0, 50.0));
        t.on_sample(&sample(t0, 0, 20.0, 50.0));
        let trip = t.finalize(t0, Utc::now()).unwrap();
        assert_eq!(trip.record.duration_seconds, 0);
        assert_eq!(trip.record.avg_speed_kmh, 0.0);
    }

    #[test]
    fn test_invalid_position_does_not_move_trip() {
        let t0 = Instant::now();
        let mut t = tracker();
        t.on_sample(&sample(t0, 0, 0.0, 40.0));
        t.on_sample(&PositionSample::with_speed_kmh(f64::NAN, 0.0, 40.0, t0 + Duration::from_secs(1)));
        t.on_sample(&sample(t0, 2, 20.0, 40.0));
        assert_abs_diff_eq!(t.total_distance_m(), 20.0, epsilon = 0.5);
    }
}
