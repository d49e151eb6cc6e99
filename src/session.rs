use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Duration, Instant, MissedTickBehavior};

use crate::alerts::{ActiveAlert, AlertDispatcher, AlertNotifier, DispatchOutcome};
use crate::config::{AlertSettings, EngineConfig};
use crate::error::{HaloError, HaloResult};
use crate::live_status::{current_timestamp, AlertStatus, LiveStatus};
use crate::markers::{MarkerQuery, MarkerStore, RefreshPolicy};
use crate::sensors::SampleSubscription;
use crate::timer::earliest;
use crate::trip::{FinalizedTrip, TripAggregate, TripStore, TripTracker};
use crate::types::PositionSample;

const LIVE_STATUS_INTERVAL: Duration = Duration::from_secs(2);

/// Session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// Not tracking
    Idle,
    /// Consuming samples
    Running,
}

/// What a session did between start and stop
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub samples: u64,
    pub alerts_fired: u64,
    pub alerts_suppressed: u64,
    pub markers_loaded: usize,
    pub alerts: Vec<ActiveAlert>,
    /// `None` when the trip was too short to keep
    pub trip: Option<FinalizedTrip>,
    pub aggregate: TripAggregate,
}

/// Wires the marker store, alert dispatcher and trip tracker to one sample
/// stream.
///
/// # Per sample
/// 1. Ask for a vicinity refresh when the policy says so (background task,
///    at most one in flight; the sample sees the snapshot already installed)
/// 2. Dispatcher: proximity, debounce, notify, active alert
/// 3. Trip tracker: distance, max speed, idle timer
///
/// All of it runs to completion before the next sample is taken.
pub struct TrackingSession {
    config: EngineConfig,
    state: SessionState,
    store: Arc<MarkerStore>,
    query: Arc<dyn MarkerQuery>,
    trip_store: Arc<dyn TripStore>,
    dispatcher: AlertDispatcher,
    tracker: TripTracker,
    policy: RefreshPolicy,
    auto_refresh: bool,
    refresh_task: Option<JoinHandle<()>>,
    aggregate: TripAggregate,
    started_at: Option<Instant>,
    samples: u64,
    last_sample: Option<PositionSample>,
    alerts: Vec<ActiveAlert>,
    live_status_path: Option<PathBuf>,
}

impl TrackingSession {
    pub fn new(
        config: EngineConfig,
        settings: AlertSettings,
        query: Arc<dyn MarkerQuery>,
        notifier: Arc<dyn AlertNotifier>,
        trip_store: Arc<dyn TripStore>,
    ) -> Self {
        Self {
            dispatcher: AlertDispatcher::new(&config, settings, notifier),
            tracker: TripTracker::new(&config),
            policy: RefreshPolicy::from_config(&config),
            config,
            state: SessionState::Idle,
            store: Arc::new(MarkerStore::new()),
            query,
            trip_store,
            auto_refresh: true,
            refresh_task: None,
            aggregate: TripAggregate::default(),
            started_at: None,
            samples: 0,
            last_sample: None,
            alerts: Vec::new(),
            live_status_path: None,
        }
    }

    /// Only use markers installed explicitly (`refresh_now` or the store);
    /// samples never trigger a query
    pub fn without_auto_refresh(mut self) -> Self {
        self.auto_refresh = false;
        self
    }

    /// Write a `LiveStatus` to `path` every 2 s while `run` is active
    pub fn with_live_status(mut self, path: impl Into<PathBuf>) -> Self {
        self.live_status_path = Some(path.into());
        self
    }

    /// Idle → Running. Loads the lifetime aggregate; a load failure starts
    /// from empty totals. Cooldowns and alert counters start over.
    pub fn start(&mut self) -> HaloResult<()> {
        if self.state == SessionState::Running {
            return Err(HaloError::AlreadyRunning);
        }
        self.aggregate = match self.trip_store.load_aggregate() {
            Ok(aggregate) => aggregate,
            Err(e) => {
                log::error!("Failed to load trip stats, starting fresh: {}", e);
                TripAggregate::default()
            }
        };
        self.dispatcher.reset();
        self.state = SessionState::Running;
        self.started_at = Some(Instant::now());
        self.samples = 0;
        self.last_sample = None;
        self.alerts.clear();
        log::info!("Tracking started ({} trips on record)", self.aggregate.total_trips);
        Ok(())
    }

    pub fn process_sample(&mut self, sample: PositionSample) -> HaloResult<DispatchOutcome> {
        if self.state != SessionState::Running {
            return Err(HaloError::NotRunning);
        }

        if self.auto_refresh {
            self.maybe_refresh(&sample);
        }

        let snapshot = self.store.snapshot();
        let outcome = self.dispatcher.on_sample(&sample, &snapshot);
        if let DispatchOutcome::Fired(alert) = &outcome {
            self.tracker.record_alert();
            self.alerts.push(alert.clone());
        }
        self.tracker.on_sample(&sample);

        self.samples += 1;
        self.last_sample = Some(sample);
        Ok(outcome)
    }

    fn refresh_in_flight(&self) -> bool {
        self.refresh_task.as_ref().map_or(false, |task| !task.is_finished())
    }

    fn maybe_refresh(&mut self, sample: &PositionSample) {
        if !sample.has_valid_position() || self.refresh_in_flight() || !self.policy.should_refresh(sample) {
            return;
        }
        self.policy
            .mark_requested(sample.latitude, sample.longitude, sample.timestamp);

        let store = self.store.clone();
        let query = self.query.clone();
        let (lat, lon) = (sample.latitude, sample.longitude);
        let radius = self.config.query_radius_m;
        log::debug!("Refreshing markers around ({:.6}, {:.6})", lat, lon);

        self.refresh_task = Some(tokio::spawn(async move {
            let _ = store.refresh(query.as_ref(), lat, lon, radius).await;
        }));
    }

    /// Query the vicinity now and wait for the result
    pub async fn refresh_now(&mut self, lat: f64, lon: f64) -> HaloResult<usize> {
        self.policy.mark_requested(lat, lon, Instant::now());
        let snapshot = self
            .store
            .refresh(self.query.as_ref(), lat, lon, self.config.query_radius_m)
            .await?;
        Ok(snapshot.len())
    }

    /// Fire whichever timers are due at `now`
    pub fn poll_timers(&mut self, now: Instant) {
        if self.dispatcher.poll(now) {
            log::debug!("Alert cleared");
        }
        self.tracker.poll_idle(now);
    }

    /// Earliest pending timer, if any
    pub fn next_deadline(&self) -> Option<Instant> {
        earliest(&[self.dispatcher.next_deadline(), self.tracker.next_deadline()])
    }

    /// Running → Idle. Closes the trip, persists it if long enough, and
    /// reports what the session did. Persistence failures are logged.
    pub fn stop(&mut self, now: Instant, date: DateTime<Utc>) -> HaloResult<SessionSummary> {
        if self.state != SessionState::Running {
            return Err(HaloError::NotRunning);
        }
        self.state = SessionState::Idle;

        if let Some(task) = self.refresh_task.take() {
            task.abort();
        }
        self.dispatcher.clear();

        let trip = self.tracker.finalize(now, date);
        if let Some(trip) = &trip {
            self.aggregate.merge(trip);
            if let Err(e) = self.trip_store.save_aggregate(&self.aggregate) {
                log::error!("Failed to save trip stats: {}", e);
            }
        }

        let summary = SessionSummary {
            samples: self.samples,
            alerts_fired: self.dispatcher.fired_count(),
            alerts_suppressed: self.dispatcher.suppressed_count(),
            markers_loaded: self.store.snapshot().len(),
            alerts: std::mem::take(&mut self.alerts),
            trip,
            aggregate: self.aggregate.clone(),
        };
        log::info!(
            "Tracking stopped: {} samples, {} alerts",
            summary.samples,
            summary.alerts_fired
        );
        Ok(summary)
    }

    /// Drive the session from `feed` until the feed ends or `shutdown` turns
    /// true, then unsubscribe and stop.
    pub async fn run(
        &mut self,
        mut feed: SampleSubscription,
        mut shutdown: watch::Receiver<bool>,
    ) -> HaloResult<SessionSummary> {
        self.start()?;

        let mut status_tick = interval(LIVE_STATUS_INTERVAL);
        status_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stopping = *shutdown.borrow();

        while !stopping {
            let deadline = self.next_deadline();
            tokio::select! {
                sample = feed.recv() => match sample {
                    Some(sample) => {
                        self.process_sample(sample)?;
                    }
                    None => {
                        log::info!("Sample feed ended");
                        stopping = true;
                    }
                },
                _ = sleep_until_deadline(deadline) => {
                    self.poll_timers(Instant::now());
                }
                _ = status_tick.tick(), if self.live_status_path.is_some() => {
                    self.write_live_status();
                }
                changed = shutdown.changed() => {
                    stopping = changed.is_err() || *shutdown.borrow();
                }
            }
        }

        feed.unsubscribe();
        let summary = self.stop(Instant::now(), Utc::now());
        self.write_live_status();
        summary
    }

    fn write_live_status(&self) {
        if let Some(path) = &self.live_status_path {
            if let Err(e) = self.live_status().save(path) {
                log::warn!("Failed to write live status to {}: {}", path.display(), e);
            }
        }
    }

    pub fn live_status(&self) -> LiveStatus {
        let snapshot = self.store.snapshot();
        let mut status = LiveStatus::new();
        status.timestamp = current_timestamp();
        status.uptime_seconds = self.started_at.map_or(0, |t| t.elapsed().as_secs());
        status.samples_processed = self.samples;
        if let Some(sample) = &self.last_sample {
            status.gps_lat = sample.latitude;
            status.gps_lon = sample.longitude;
            status.speed_kmh = sample.speed_kmh();
        }
        status.markers_loaded = snapshot.len();
        status.marker_generation = snapshot.generation();
        status.active_alert = self.dispatcher.active().map(|alert| AlertStatus {
            marker_id: alert.marker.id.clone(),
            kind: alert.marker.kind.label().to_string(),
            severity: alert.marker.severity.to_string(),
            distance_meters: alert.distance_meters,
            speed_violation: alert.speed_violation,
            message: alert.message(),
        });
        status.alerts_fired = self.dispatcher.fired_count();
        status.alerts_suppressed = self.dispatcher.suppressed_count();
        status.trip_active = self.tracker.is_active();
        status.trip_distance_m = self.tracker.total_distance_m();
        status.trip_max_speed_kmh = self.tracker.max_speed_kmh();
        status
    }

    pub fn set_alert_settings(&mut self, settings: AlertSettings) {
        self.dispatcher.set_settings(settings);
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn store(&self) -> &Arc<MarkerStore> {
        &self.store
    }

    pub fn active_alert(&self) -> Option<&ActiveAlert> {
        self.dispatcher.active()
    }

    pub fn trip(&self) -> &TripTracker {
        &self.tracker
    }

    pub fn aggregate(&self) -> &TripAggregate {
        &self.aggregate
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
