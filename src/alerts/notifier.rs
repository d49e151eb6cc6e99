use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::sync::Mutex;
use tokio::time::Duration;

use crate::error::HaloError;
use crate::types::Severity;

/// Playback failures reported by a notifier
#[derive(Debug, Clone, PartialEq)]
pub enum NotifyError {
    Unavailable,
    Playback(String),
    Speech(String),
}

impl Display for NotifyError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            NotifyError::Unavailable => write!(f, "Audio output unavailable"),
            NotifyError::Playback(msg) => write!(f, "Playback failed: {}", msg),
            NotifyError::Speech(msg) => write!(f, "Speech failed: {}", msg),
        }
    }
}

impl std::error::Error for NotifyError {}

impl From<NotifyError> for HaloError {
    fn from(e: NotifyError) -> Self {
        HaloError::Notify(e.to_string())
    }
}

/// Vibration accompanying an alert
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum HapticPattern {
    None,
    /// One medium impact
    SingleMedium,
    /// Two heavy impacts, `PULSE_GAP` apart
    DoubleHeavy,
}

impl HapticPattern {
    pub const PULSE_GAP: Duration = Duration::from_millis(200);

    pub fn for_severity(severity: Severity, vibration: bool) -> Self {
        if !vibration {
            return HapticPattern::None;
        }
        match severity {
            Severity::High | Severity::Critical => HapticPattern::DoubleHeavy,
            Severity::Low | Severity::Medium => HapticPattern::SingleMedium,
        }
    }

    pub fn pulse_count(&self) -> usize {
        match self {
            HapticPattern::None => 0,
            HapticPattern::SingleMedium => 1,
            HapticPattern::DoubleHeavy => 2,
        }
    }
}

/// Audio, haptic and voice output. Calls are best effort and must not block.
pub trait AlertNotifier: Send + Sync {
    /// Alert tone at `volume` (0.0 to 1.0) plus the haptic pattern
    fn play_alert(&self, severity: Severity, haptic: HapticPattern, volume: f32) -> Result<(), NotifyError>;

    fn speak(&self, message: &str) -> Result<(), NotifyError>;

    /// Vibration alone, used when the tone could not be played
    fn vibrate(&self, _haptic: HapticPattern) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Notifier for headless hosts: every output becomes a log line
#[derive(Debug, Default)]
pub struct LogNotifier;

impl AlertNotifier for LogNotifier {
    fn play_alert(&self, severity: Severity, haptic: HapticPattern, volume: f32) -> Result<(), NotifyError> {
        log::info!("[alert] tone severity={} volume={:.2} haptic={:?}", severity, volume, haptic);
        Ok(())
    }

    fn speak(&self, message: &str) -> Result<(), NotifyError> {
        log::info!("[voice] {}", message);
        Ok(())
    }

    fn vibrate(&self, haptic: HapticPattern) -> Result<(), NotifyError> {
        log::info!("[alert] haptic={:?}", haptic);
        Ok(())
    }
}

/// One call made on a `RecordingNotifier`
#[derive(Clone, Debug, PartialEq)]
pub enum NotifyCall {
    Alert(Severity, HapticPattern),
    Speak(String),
    Vibrate(HapticPattern),
}

/// Keeps every call in memory; can be told to fail playback
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<NotifyCall>>,
    volumes: Mutex<Vec<f32>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records calls but reports every tone and speech call as failed
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<NotifyCall> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Volume of every tone played, in order
    pub fn volumes(&self) -> Vec<f32> {
        match self.volumes.lock() {
            Ok(volumes) => volumes.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn push(&self, call: NotifyCall) {
        match self.calls.lock() {
            Ok(mut calls) => calls.push(call),
            Err(poisoned) => poisoned.into_inner().push(call),
        }
    }
}

impl AlertNotifier for RecordingNotifier {
    fn play_alert(&self, severity: Severity, haptic: HapticPattern, volume: f32) -> Result<(), NotifyError> {
        self.push(NotifyCall::Alert(severity, haptic));
        match self.volumes.lock() {
            Ok(mut volumes) => volumes.push(volume),
            Err(poisoned) => poisoned.into_inner().push(volume),
        }
        if self.fail {
            return Err(NotifyError::Unavailable);
        }
        Ok(())
    }

    fn speak(&self, message: &str) -> Result<(), NotifyError> {
        self.push(NotifyCall::Speak(message.to_string()));
        if self.fail {
            return Err(NotifyError::Speech("no voice engine".to_string()));
        }
        Ok(())
    }

    fn vibrate(&self, haptic: HapticPattern) -> Result<(), NotifyError> {
        self.push(NotifyCall::Vibrate(haptic));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haptic_for_severity() {
        assert_eq!(HapticPattern::for_severity(Severity::Critical, true), HapticPattern::DoubleHeavy);
        assert_eq!(HapticPattern::for_severity(Severity::High, true), HapticPattern::DoubleHeavy);
        assert_eq!(HapticPattern::for_severity(Severity::Medium, true), HapticPattern::SingleMedium);
        assert_eq!(HapticPattern::for_severity(Severity::Low, true), HapticPattern::SingleMedium);
        assert_eq!(HapticPattern::for_severity(Severity::Critical, false), HapticPattern::None);
        assert_eq!(HapticPattern::DoubleHeavy.pulse_count(), 2);
    }

    #[test]
    fn test_recording_notifier() {
        let n = RecordingNotifier::new();
        n.play_alert(Severity::High, HapticPattern::DoubleHeavy, 0.8).unwrap();
        n.speak("Speed Camera ahead, 10 meters away").unwrap();
        assert_eq!(
            n.calls(),
            vec![
                NotifyCall::Alert(Severity::High, HapticPattern::DoubleHeavy),
                NotifyCall::Speak("Speed Camera ahead, 10 meters away".to_string()),
            ]
        );
        assert_eq!(n.volumes(), vec![0.8]);

        let failing = RecordingNotifier::failing();
        assert!(failing.play_alert(Severity::Low, HapticPattern::None, 1.0).is_err());
        assert_eq!(failing.calls().len(), 1);
    }
}
