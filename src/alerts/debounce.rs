use std::collections::HashMap;
use tokio::time::{Duration, Instant};

/// Per-marker cooldown between alerts.
///
/// Check and commit are separate: `should_fire` only looks, the caller
/// `record`s once it actually fires.
pub struct AlertDebouncer {
    cooldown: Duration,
    last_fired: HashMap<String, Instant>,
}

impl AlertDebouncer {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_fired: HashMap::new(),
        }
    }

    pub fn should_fire(&self, marker_id: &str, now: Instant) -> bool {
        match self.last_fired.get(marker_id) {
            Some(&at) => now.saturating_duration_since(at) >= self.cooldown,
            None => true,
        }
    }

    pub fn record(&mut self, marker_id: &str, now: Instant) {
        self.last_fired.insert(marker_id.to_string(), now);
    }

    /// Drop entries for markers `keep` rejects
    pub fn prune(&mut self, keep: impl Fn(&str) -> bool) {
        let before = self.last_fired.len();
        self.last_fired.retain(|id, _| keep(id));
        let dropped = before - self.last_fired.len();
        if dropped > 0 {
            log::debug!("Pruned {} debounce entries", dropped);
        }
    }

    pub fn clear(&mut self) {
        self.last_fired.clear();
    }

    pub fn len(&self) -> usize {
        self.last_fired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_fired.is_empty()
    }
}
