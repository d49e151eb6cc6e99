use flate2::read::GzDecoder;
use geo::{HaversineDestination, Point};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};

use crate::error::HaloResult;
use crate::geo_math::MPS_TO_KMH;
use crate::types::{GpsFix, PositionSample};

const FEED_CAPACITY: usize = 64;

/// A live feed of position samples. Dropping or unsubscribing stops the
/// producer task.
pub struct SampleSubscription {
    rx: Receiver<PositionSample>,
    producer: Option<JoinHandle<()>>,
}

impl SampleSubscription {
    /// Subscription over a channel filled by someone else
    pub fn from_receiver(rx: Receiver<PositionSample>) -> Self {
        Self { rx, producer: None }
    }

    pub async fn recv(&mut self) -> Option<PositionSample> {
        self.rx.recv().await
    }

    pub fn unsubscribe(&mut self) {
        self.rx.close();
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }
}

impl Drop for SampleSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Channel for hosts that push samples themselves
pub fn channel() -> (Sender<PositionSample>, SampleSubscription) {
    let (tx, rx) = mpsc::channel(FEED_CAPACITY);
    (tx, SampleSubscription::from_receiver(rx))
}

/// Play fixes back in real time, divided by `time_scale` (2.0 = twice as
/// fast). Each sample is stamped with the moment it is delivered.
pub fn spawn_fix_feed(fixes: Vec<GpsFix>, time_scale: f64) -> SampleSubscription {
    let (tx, rx) = mpsc::channel(FEED_CAPACITY);
    let scale = if time_scale.is_finite() && time_scale > 0.0 { time_scale } else { 1.0 };

    let producer = tokio::spawn(async move {
        let mut sent = 0u64;
        let mut prev_ts: Option<f64> = None;

        for fix in fixes {
            if let Some(prev) = prev_ts {
                let gap = ((fix.timestamp - prev) / scale).max(0.0);
                sleep(Duration::from_secs_f64(gap)).await;
            }
            prev_ts = Some(fix.timestamp);

            let sample = PositionSample::new(fix.latitude, fix.longitude, fix.speed.unwrap_or(0.0), Instant::now());
            if tx.send(sample).await.is_err() {
                log::debug!("[gps] Feed closed after {} fixes", sent);
                return;
            }
            sent += 1;
            if sent % 100 == 0 {
                log::debug!("[gps] {} fixes", sent);
            }
        }
        log::info!("[gps] Feed finished after {} fixes", sent);
    });

    SampleSubscription {
        rx,
        producer: Some(producer),
    }
}

/// Map recorded fixes onto the monotonic clock starting at `epoch`, keeping
/// the recorded spacing
pub fn fixes_to_samples(fixes: &[GpsFix], epoch: Instant) -> Vec<PositionSample> {
    let Some(first) = fixes.first() else {
        return Vec::new();
    };
    let epoch_ts = first.timestamp;
    fixes.iter().map(|fix| fix.to_sample(epoch, epoch_ts)).collect()
}

// ============================================================================
// Mock drive
// ============================================================================

/// Constant speed along a bearing
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DriveLeg {
    pub bearing_deg: f64,
    pub speed_kmh: f64,
    pub duration_secs: u64,
}

/// Synthetic drive made of legs, sampled once per `interval`
#[derive(Clone, Debug)]
pub struct MockDrive {
    start: (f64, f64),
    interval: Duration,
    legs: Vec<DriveLeg>,
}

impl MockDrive {
    pub fn new(lat: f64, lon: f64, interval: Duration) -> Self {
        Self {
            start: (lat, lon),
            interval,
            legs: Vec::new(),
        }
    }

    pub fn leg(mut self, bearing_deg: f64, speed_kmh: f64, duration_secs: u64) -> Self {
        self.legs.push(DriveLeg {
            bearing_deg,
            speed_kmh,
            duration_secs,
        });
        self
    }

    /// Fixes for the whole drive, the first one at the start point with t=0
    pub fn fixes(&self) -> Vec<GpsFix> {
        let step_secs = self.interval.as_secs_f64().max(0.001);
        let mut position = Point::new(self.start.1, self.start.0);
        let mut t = 0.0;
        let mut fixes = vec![GpsFix {
            timestamp: 0.0,
            latitude: position.y(),
            longitude: position.x(),
            speed: Some(self.legs.first().map_or(0.0, |l| l.speed_kmh / MPS_TO_KMH)),
            accuracy: Some(5.0),
        }];

        for leg in &self.legs {
            let speed_mps = leg.speed_kmh / MPS_TO_KMH;
            let steps = (leg.duration_secs as f64 / step_secs).round() as u64;
            for _ in 0..steps {
                position = position.haversine_destination(leg.bearing_deg, speed_mps * step_secs);
                t += step_secs;
                fixes.push(GpsFix {
                    timestamp: t,
                    latitude: position.y(),
                    longitude: position.x(),
                    speed: Some(speed_mps),
                    accuracy: Some(5.0),
                });
            }
        }
        fixes
    }

    pub fn subscribe(&self, time_scale: f64) -> SampleSubscription {
        spawn_fix_feed(self.fixes(), time_scale)
    }
}

// ============================================================================
// Recorded logs
// ============================================================================

#[derive(Deserialize)]
struct Reading {
    gps: Option<GpsFix>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FixLog {
    Bare(Vec<GpsFix>),
    Fixes { fixes: Vec<GpsFix> },
    Readings { readings: Vec<Reading> },
}

impl FixLog {
    fn into_fixes(self) -> Vec<GpsFix> {
        match self {
            FixLog::Bare(fixes) | FixLog::Fixes { fixes } => fixes,
            FixLog::Readings { readings } => readings.into_iter().filter_map(|r| r.gps).collect(),
        }
    }
}

/// Load a recorded drive (`.json` or gzip `.json.gz`). Accepts a bare fix
/// array, `{ "fixes": [...] }` or a sensor log `{ "readings": [{ "gps": ... }] }`.
pub fn load_fixes(path: &Path) -> HaloResult<Vec<GpsFix>> {
    let file = File::open(path)?;
    let log: FixLog = if path.extension().map(|e| e == "gz").unwrap_or(false) {
        serde_json::from_reader(BufReader::new(GzDecoder::new(file)))?
    } else {
        serde_json::from_reader(BufReader::new(file))?
    };
    let fixes = log.into_fixes();
    log::info!("Loaded {} fixes from {}", fixes.len(), path.display());
    Ok(fixes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_math::distance_meters;
    use approx::assert_abs_diff_eq;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_mock_drive_geometry() {
        let drive = MockDrive::new(30.86, 75.86, Duration::from_secs(1))
            .leg(0.0, 36.0, 10)
            .leg(90.0, 72.0, 5);
        let fixes = drive.fixes();
        assert_eq!(fixes.len(), 16);
        assert_eq!(fixes[0].timestamp, 0.0);

        // 10 s north at 10 m/s
        let d = distance_meters(fixes[0].latitude, fixes[0].longitude, fixes[10].latitude, fixes[10].longitude);
        assert_abs_diff_eq!(d, 100.0, epsilon = 0.5);
        assert!(fixes[10].latitude > fixes[0].latitude);

        // then 5 s east at 20 m/s
        let d = distance_meters(fixes[10].latitude, fixes[10].longitude, fixes[15].latitude, fixes[15].longitude);
        assert_abs_diff_eq!(d, 100.0, epsilon = 0.5);
        assert!(fixes[15].longitude > fixes[10].longitude);
        assert_abs_diff_eq!(fixes[15].timestamp, 15.0, epsilon = 1e-9);
    }

    #[test]
    fn test_fixes_to_samples_keeps_spacing() {
        let drive = MockDrive::new(30.86, 75.86, Duration::from_secs(2)).leg(45.0, 50.0, 10);
        let epoch = Instant::now();
        let samples = fixes_to_samples(&drive.fixes(), epoch);
        assert_eq!(samples.len(), 6);
        assert_eq!(samples[0].timestamp, epoch);
        assert_eq!(samples[5].timestamp - epoch, Duration::from_secs(10));
        assert_abs_diff_eq!(samples[3].speed_kmh(), 50.0, epsilon = 1e-9);
        assert!(fixes_to_samples(&[], epoch).is_empty());
    }

    #[test]
    fn test_load_fixes_formats() {
        let dir = std::env::temp_dir().join(format!("highway_halo_fixes_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let bare = dir.join("bare.json");
        std::fs::write(&bare, r#"[{"timestamp": 1.0, "latitude": 30.0, "longitude": 75.0, "speed": 5.0}]"#).unwrap();
        assert_eq!(load_fixes(&bare).unwrap().len(), 1);

        let readings = dir.join("readings.json");
        std::fs::write(
            &readings,
            r#"{"readings": [
                {"timestamp": 1.0, "gps": {"timestamp": 1.0, "latitude": 30.0, "longitude": 75.0, "speed": 5.0, "accuracy": 4.0}},
                {"timestamp": 1.1, "accel": {"x": 0.0}},
                {"timestamp": 2.0, "gps": {"timestamp": 2.0, "latitude": 30.0001, "longitude": 75.0}}
            ]}"#,
        )
        .unwrap();
        let fixes = load_fixes(&readings).unwrap();
        assert_eq!(fixes.len(), 2);
        assert_eq!(fixes[1].speed, None);

        let gz = dir.join("wrapped.json.gz");
        let mut encoder = GzEncoder::new(File::create(&gz).unwrap(), Compression::default());
        encoder
            .write_all(br#"{"fixes": [{"timestamp": 0.0, "latitude": 1.0, "longitude": 2.0}, {"timestamp": 1.0, "latitude": 1.0, "longitude": 2.0}]}"#)
            .unwrap();
        encoder.finish().unwrap();
        assert_eq!(load_fixes(&gz).unwrap().len(), 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fix_feed_delivers_in_order() {
        let drive = MockDrive::new(30.86, 75.86, Duration::from_secs(1)).leg(0.0, 36.0, 3);
        let mut sub = drive.subscribe(1.0);
        let mut lats = Vec::new();
        while let Some(sample) = sub.recv().await {
            lats.push(sample.latitude);
        }
        assert_eq!(lats.len(), 4);
        assert!(lats.windows(2).all(|w| w[1] > w[0]));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_feed() {
        let drive = MockDrive::new(30.86, 75.86, Duration::from_secs(1)).leg(0.0, 36.0, 600);
        let mut sub = drive.subscribe(1.0);
        assert!(sub.recv().await.is_some());
        sub.unsubscribe();
        // Buffered samples, if any, drain and then the feed ends
        while sub.recv().await.is_some() {}
    }
}
