use serde::Serialize;

use crate::markers::MarkerSnapshot;
use crate::types::{HazardMarker, PositionSample};

/// Marker selected for a sample, with the distance it was selected at
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AlertCandidate {
    pub marker: HazardMarker,
    pub distance_m: f64,
    pub current_speed_kmh: f64,
}

/// Nearest marker whose own trigger radius contains the sample position.
///
/// The snapshot's R-tree narrows the set with the largest trigger radius
/// first; every survivor is then checked exactly against its own radius.
/// Equidistant markers resolve to the one earlier in snapshot order.
pub fn evaluate(sample: &PositionSample, snapshot: &MarkerSnapshot) -> Option<AlertCandidate> {
    if !sample.has_valid_position() {
        return None;
    }
    nearest_within_radius(sample, snapshot.candidates(sample.latitude, sample.longitude))
}

/// Single pass over `markers` in the order given
pub fn nearest_within_radius<'a>(
    sample: &PositionSample,
    markers: impl IntoIterator<Item = &'a HazardMarker>,
) -> Option<AlertCandidate> {
    let mut best: Option<(&HazardMarker, f64)> = None;

    for marker in markers {
        let distance = marker.distance_from(sample.latitude, sample.longitude);
        if distance > marker.trigger_radius_m {
            continue;
        }
        // Strict comparison keeps the first of equidistant markers
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((marker, distance));
        }
    }

    best.map(|(marker, distance_m)| AlertCandidate {
        marker: marker.clone(),
        distance_m,
        current_speed_kmh: sample.speed_kmh(),
    })
}
