use tokio::time::{Duration, Instant};

/// A one-shot delayed action owned by the component that armed it.
///
/// Re-arming replaces the previous deadline and `cancel` drops it, so a
/// superseded timer can never fire. The owner drives it by calling
/// `fire_if_due` with the current time, either when a sample arrives or when
/// the session loop wakes at `when()`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the timer to fire `delay` after `now`
    pub fn arm(&mut self, now: Instant, delay: Duration) {
        self.at = Some(now + delay);
    }

    pub fn cancel(&mut self) {
        self.at = None;
    }

    pub fn is_armed(&self) -> bool {
        self.at.is_some()
    }

    pub fn when(&self) -> Option<Instant> {
        self.at
    }

    /// Returns true exactly once, on the first call at or after the deadline
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        match self.at {
            Some(at) if now >= at => {
                self.at = None;
                true
            }
            _ => false,
        }
    }
}

/// Earliest of several optional deadlines
pub fn earliest(deadlines: &[Option<Instant>]) -> Option<Instant> {
    deadlines.iter().flatten().min().copied()
}
