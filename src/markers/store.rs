use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::time::{Duration, Instant};

use super::backend::MarkerQuery;
use super::index::MarkerIndex;
use crate::config::EngineConfig;
use crate::error::HaloResult;
use crate::geo_math::distance_meters;
use crate::types::{HazardMarker, PositionSample};

/// Immutable set of markers for one vicinity, as installed by one refresh
pub struct MarkerSnapshot {
    generation: u64,
    center: Option<(f64, f64)>,
    markers: Vec<HazardMarker>,
    ids: HashSet<String>,
    index: MarkerIndex,
    max_trigger_radius_m: f64,
}

impl MarkerSnapshot {
    pub fn empty() -> Self {
        MarkerSnapshot {
            generation: 0,
            center: None,
            markers: Vec::new(),
            ids: HashSet::new(),
            index: MarkerIndex::new(),
            max_trigger_radius_m: 0.0,
        }
    }

    /// Build a snapshot, dropping malformed markers and repeated ids
    /// (first occurrence wins, order otherwise preserved)
    pub fn build(generation: u64, center: Option<(f64, f64)>, candidates: Vec<HazardMarker>) -> Self {
        let mut ids = HashSet::with_capacity(candidates.len());
        let mut markers = Vec::with_capacity(candidates.len());

        for marker in candidates {
            if let Err(e) = marker.validate() {
                log::warn!("Skipping marker: {}", e);
                continue;
            }
            if !ids.insert(marker.id.clone()) {
                log::warn!("Skipping duplicate marker id {}", marker.id);
                continue;
            }
            markers.push(marker);
        }

        let max_trigger_radius_m = markers
            .iter()
            .map(|m| m.trigger_radius_m)
            .fold(0.0, f64::max);
        let index = MarkerIndex::from_positions(markers.iter().map(|m| (m.latitude, m.longitude)));

        MarkerSnapshot {
            generation,
            center,
            markers,
            ids,
            index,
            max_trigger_radius_m,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Query center the snapshot was fetched for
    pub fn center(&self) -> Option<(f64, f64)> {
        self.center
    }

    pub fn markers(&self) -> &[HazardMarker] {
        &self.markers
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn max_trigger_radius_m(&self) -> f64 {
        self.max_trigger_radius_m
    }

    /// Markers that might be within their trigger radius of the point, in
    /// snapshot order. Coarse filter only: no marker within its radius is
    /// ever left out, but some outside it may be included.
    pub fn candidates(&self, lat: f64, lon: f64) -> impl Iterator<Item = &HazardMarker> + '_ {
        self.index
            .slots_within(lat, lon, self.max_trigger_radius_m)
            .into_iter()
            .map(move |slot| &self.markers[slot])
    }
}

/// Holds the latest marker snapshot for the current vicinity.
///
/// Readers get an `Arc` to a complete snapshot; refresh builds the new one
/// off to the side and swaps the pointer, so a reader never sees a torn set.
pub struct MarkerStore {
    current: RwLock<Arc<MarkerSnapshot>>,
    next_generation: AtomicU64,
}

impl MarkerStore {
    pub fn new() -> Self {
        MarkerStore {
            current: RwLock::new(Arc::new(MarkerSnapshot::empty())),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn snapshot(&self) -> Arc<MarkerSnapshot> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Copy of the current marker sequence
    pub fn current_markers(&self) -> Vec<HazardMarker> {
        self.snapshot().markers().to_vec()
    }

    /// Install a new marker set, replacing the previous one whole
    pub fn replace(&self, center: Option<(f64, f64)>, markers: Vec<HazardMarker>) -> Arc<MarkerSnapshot> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let snapshot = Arc::new(MarkerSnapshot::build(generation, center, markers));

        match self.current.write() {
            Ok(mut guard) => *guard = snapshot.clone(),
            Err(poisoned) => *poisoned.into_inner() = snapshot.clone(),
        }
        snapshot
    }

    /// Re-query the vicinity around `(lat, lon)`.
    ///
    /// On failure the previous snapshot stays in place and the error is
    /// returned for the caller to log.
    pub async fn refresh(
        &self,
        query: &dyn MarkerQuery,
        lat: f64,
        lon: f64,
        radius_m: f64,
    ) -> HaloResult<Arc<MarkerSnapshot>> {
        match query.query_nearby(lat, lon, radius_m).await {
            Ok(markers) => {
                let snapshot = self.replace(Some((lat, lon)), markers);
                log::info!(
                    "Loaded {} markers around ({:.6}, {:.6}), generation {}",
                    snapshot.len(),
                    lat,
                    lon,
                    snapshot.generation()
                );
                Ok(snapshot)
            }
            Err(e) => {
                log::warn!(
                    "Marker refresh around ({:.6}, {:.6}) failed, keeping {} markers: {}",
                    lat,
                    lon,
                    self.snapshot().len(),
                    e
                );
                Err(e.into())
            }
        }
    }
}

impl Default for MarkerStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Decides when the host should re-query the vicinity: on the first fix,
/// after moving `requery_distance_m` from the last query center, or when
/// the polling interval elapsed.
#[derive(Clone, Debug)]
pub struct RefreshPolicy {
    requery_distance_m: f64,
    interval: Option<Duration>,
    last_center: Option<(f64, f64)>,
    last_request: Option<Instant>,
}

impl RefreshPolicy {
    pub fn new(requery_distance_m: f64, interval: Option<Duration>) -> Self {
        RefreshPolicy {
            requery_distance_m,
            interval,
            last_center: None,
            last_request: None,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.requery_distance_m, config.requery_interval())
    }

    pub fn should_refresh(&self, sample: &PositionSample) -> bool {
        let Some((lat, lon)) = self.last_center else {
            return true;
        };

        if distance_meters(lat, lon, sample.latitude, sample.longitude) > self.requery_distance_m {
            return true;
        }

        match (self.interval, self.last_request) {
            (Some(interval), Some(at)) => sample.timestamp.saturating_duration_since(at) >= interval,
            _ => false,
        }
    }

    pub fn mark_requested(&mut self, lat: f64, lon: f64, at: Instant) {
        self.last_center = Some((lat, lon));
        self.last_request = Some(at);
    }
}
