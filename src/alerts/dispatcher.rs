use serde::Serialize;
use std::sync::Arc;
use tokio::time::{Duration, Instant};

use super::debounce::AlertDebouncer;
use super::notifier::{AlertNotifier, HapticPattern};
use super::proximity::{self, AlertCandidate};
use crate::config::{AlertSettings, EngineConfig};
use crate::markers::MarkerSnapshot;
use crate::timer::Deadline;
use crate::types::{HazardMarker, PositionSample};

/// The alert currently shown to the driver
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActiveAlert {
    pub marker: HazardMarker,
    pub distance_meters: u32,
    pub current_speed_kmh: u32,
    /// Driving faster than the marker's speed limit
    pub speed_violation: bool,
    #[serde(skip)]
    pub raised_at: Instant,
}

impl ActiveAlert {
    fn from_candidate(candidate: AlertCandidate, now: Instant) -> Self {
        let speed_violation = candidate
            .marker
            .speed_limit
            .map_or(false, |limit| candidate.current_speed_kmh > f64::from(limit));

        ActiveAlert {
            distance_meters: candidate.distance_m.round() as u32,
            current_speed_kmh: candidate.current_speed_kmh.round() as u32,
            speed_violation,
            raised_at: now,
            marker: candidate.marker,
        }
    }

    /// Spoken form, e.g. "Speed Camera ahead, 120 meters away"
    pub fn message(&self) -> String {
        format!("{} ahead, {} meters away", self.marker.kind.label(), self.distance_meters)
    }

    /// Id to upvote or resolve when the alert is about a community report
    pub fn report_id(&self) -> Option<&str> {
        self.marker.is_report().then_some(self.marker.id.as_str())
    }
}

/// What one sample did to the alert state
#[derive(Clone, Debug, PartialEq)]
pub enum DispatchOutcome {
    /// No marker in range
    Quiet,
    /// In range of a marker that alerted within the cooldown
    Suppressed { marker_id: String },
    Fired(ActiveAlert),
}

/// Runs proximity, debounce and notification for each sample and owns the
/// active alert with its auto-clear timer.
pub struct AlertDispatcher {
    debouncer: AlertDebouncer,
    notifier: Arc<dyn AlertNotifier>,
    settings: AlertSettings,
    display_for: Duration,
    active: Option<ActiveAlert>,
    clear_timer: Deadline,
    /// Snapshot generation the debouncer was last pruned against
    seen_generation: u64,
    fired: u64,
    suppressed: u64,
}

impl AlertDispatcher {
    pub fn new(config: &EngineConfig, settings: AlertSettings, notifier: Arc<dyn AlertNotifier>) -> Self {
        Self {
            debouncer: AlertDebouncer::new(config.debounce_cooldown()),
            notifier,
            settings,
            display_for: config.alert_display(),
            active: None,
            clear_timer: Deadline::new(),
            seen_generation: 0,
            fired: 0,
            suppressed: 0,
        }
    }

    pub fn on_sample(&mut self, sample: &PositionSample, snapshot: &MarkerSnapshot) -> DispatchOutcome {
        let now = sample.timestamp;
        self.poll(now);

        if snapshot.generation() != self.seen_generation {
            self.debouncer.prune(|id| snapshot.contains_id(id));
            self.seen_generation = snapshot.generation();
        }

        let Some(candidate) = proximity::evaluate(sample, snapshot) else {
            return DispatchOutcome::Quiet;
        };

        if !self.debouncer.should_fire(&candidate.marker.id, now) {
            self.suppressed += 1;
            log::debug!(
                "Suppressed {} ({}) at {:.0} m",
                candidate.marker.kind,
                candidate.marker.id,
                candidate.distance_m
            );
            return DispatchOutcome::Suppressed {
                marker_id: candidate.marker.id,
            };
        }

        self.debouncer.record(&candidate.marker.id, now);
        self.fired += 1;

        let alert = ActiveAlert::from_candidate(candidate, now);
        log::info!(
            "Alert: {} ({}) at {} m, {} km/h{}",
            alert.marker.kind,
            alert.marker.id,
            alert.distance_meters,
            alert.current_speed_kmh,
            if alert.speed_violation { ", over the limit" } else { "" }
        );

        self.active = Some(alert.clone());
        self.clear_timer.arm(now, self.display_for);
        self.notify(&alert);

        DispatchOutcome::Fired(alert)
    }

    /// Playback failures are logged and dropped; the visual alert stands
    fn notify(&self, alert: &ActiveAlert) {
        if !self.settings.audio_alerts {
            return;
        }

        let haptic = HapticPattern::for_severity(alert.marker.severity, self.settings.vibration);
        let volume = self.settings.alert_volume.clamp(0.0, 1.0);
        if let Err(e) = self.notifier.play_alert(alert.marker.severity, haptic, volume) {
            log::warn!("Alert tone failed: {}", e);
            if self.settings.vibration {
                if let Err(e) = self.notifier.vibrate(HapticPattern::SingleMedium) {
                    log::warn!("Fallback vibration failed: {}", e);
                }
            }
        }

        if self.settings.voice_alerts {
            if let Err(e) = self.notifier.speak(&alert.message()) {
                log::warn!("Voice alert failed: {}", e);
            }
        }
    }

    /// Clear the active alert once its display time is up. Returns true if
    /// it was cleared by this call.
    pub fn poll(&mut self, now: Instant) -> bool {
        if self.clear_timer.fire_if_due(now) {
            self.active = None;
            return true;
        }
        false
    }

    /// Drop the active alert and its pending auto-clear
    pub fn clear(&mut self) {
        self.clear_timer.cancel();
        self.active = None;
    }

    /// Forget everything from a previous tracking run: active alert,
    /// cooldowns and counters
    pub fn reset(&mut self) {
        self.clear();
        self.debouncer.clear();
        self.seen_generation = 0;
        self.fired = 0;
        self.suppressed = 0;
    }

    pub fn active(&self) -> Option<&ActiveAlert> {
        self.active.as_ref()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.clear_timer.when()
    }

    pub fn set_settings(&mut self, settings: AlertSettings) {
        self.settings = settings;
    }

    pub fn fired_count(&self) -> u64 {
        self.fired
    }

    pub fn suppressed_count(&self) -> u64 {
        self.suppressed
    }

    pub fn debounce_entries(&self) -> usize {
        self.debouncer.len()
    }
}
