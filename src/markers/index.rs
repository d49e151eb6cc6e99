use rstar::primitives::GeomWithData;
use rstar::{RTree, AABB};

use crate::geo_math::EARTH_RADIUS_M;

/// Marker position keyed by its slot in the snapshot's marker vector
type IndexedPoint = GeomWithData<[f64; 2], usize>;

/// Meters per degree of latitude (and of longitude at the equator)
const METERS_PER_DEGREE: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;

/// Slack applied to the search box so the degree approximation never cuts off
/// a marker that is inside the radius by exact haversine distance
const ENVELOPE_MARGIN: f64 = 1.1;

/// R-Tree over marker positions for the coarse first pass of proximity checks
///
/// # Architecture
/// - Points are stored as `[lon, lat]` with the marker's slot as payload
/// - Radius queries use a lat/lon bounding box widened by `ENVELOPE_MARGIN`;
///   callers still run the exact per-marker haversine check on the result
/// - Rebuilt whole on every snapshot swap (bulk load), never mutated
pub struct MarkerIndex {
    tree: RTree<IndexedPoint>,
}

impl MarkerIndex {
    pub fn new() -> Self {
        MarkerIndex { tree: RTree::new() }
    }

    /// Bulk load from `(lat, lon)` positions; slot `i` is the i-th position
    pub fn from_positions(positions: impl IntoIterator<Item = (f64, f64)>) -> Self {
        let points: Vec<IndexedPoint> = positions
            .into_iter()
            .enumerate()
            .map(|(slot, (lat, lon))| GeomWithData::new([lon, lat], slot))
            .collect();

        MarkerIndex {
            tree: RTree::bulk_load(points),
        }
    }

    /// Slots of all markers that may lie within `radius_m` of the point,
    /// in ascending slot order
    pub fn slots_within(&self, lat: f64, lon: f64, radius_m: f64) -> Vec<usize> {
        let reach = radius_m * ENVELOPE_MARGIN;
        let d_lat = reach / METERS_PER_DEGREE;
        let (south, north) = (lat - d_lat, lat + d_lat);

        // Longitude degrees are narrowest at the box edge nearest the pole
        let poleward = lat.abs() + d_lat;
        let d_lon = if poleward >= 90.0 {
            180.0
        } else {
            (reach / (METERS_PER_DEGREE * poleward.to_radians().cos())).min(180.0)
        };

        let mut envelopes = Vec::with_capacity(2);
        if d_lon >= 180.0 {
            envelopes.push(AABB::from_corners([-180.0, south], [180.0, north]));
        } else {
            let (west, east) = (lon - d_lon, lon + d_lon);
            envelopes.push(AABB::from_corners([west.max(-180.0), south], [east.min(180.0), north]));
            // Part of the box that crosses the antimeridian
            if west < -180.0 {
                envelopes.push(AABB::from_corners([west + 360.0, south], [180.0, north]));
            }
            if east > 180.0 {
                envelopes.push(AABB::from_corners([-180.0, south], [east - 360.0, north]));
            }
        }

        let mut slots: Vec<usize> = envelopes
            .iter()
            .flat_map(|envelope| self.tree.locate_in_envelope(envelope).map(|point| point.data))
            .collect();
        slots.sort_unstable();
        slots.dedup();
        slots
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

impl Default for MarkerIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_math::offset_meters;

    const ORIGIN: (f64, f64) = (30.8600959, 75.8610409);

    #[test]
    fn test_empty_index() {
        let index = MarkerIndex::new();
        assert!(index.is_empty());
        assert!(index.slots_within(ORIGIN.0, ORIGIN.1, 1000.0).is_empty());
    }

    #[test]
    fn test_radius_filter() {
        let positions = vec![
            offset_meters(ORIGIN.0, ORIGIN.1, 50.0, 0.0),
            offset_meters(ORIGIN.0, ORIGIN.1, 0.0, 400.0),
            offset_meters(ORIGIN.0, ORIGIN.1, -5000.0, 0.0),
        ];
        let index = MarkerIndex::from_positions(positions);
        assert_eq!(index.len(), 3);

        assert_eq!(index.slots_within(ORIGIN.0, ORIGIN.1, 100.0), vec![0]);
        assert_eq!(index.slots_within(ORIGIN.0, ORIGIN.1, 500.0), vec![0, 1]);
        assert_eq!(index.slots_within(ORIGIN.0, ORIGIN.1, 10_000.0), vec![0, 1, 2]);
    }

    #[test]
    fn test_box_covers_exact_radius_east_west() {
        // A marker exactly 149 m east must survive a 150 m query even at high latitude
        let (lat, lon) = (60.0, 10.0);
        let east = offset_meters(lat, lon, 0.0, 149.0);
        let index = MarkerIndex::from_positions(vec![east]);
        assert_eq!(index.slots_within(lat, lon, 150.0), vec![0]);
    }

    #[test]
    fn test_box_wraps_across_antimeridian() {
        let index = MarkerIndex::from_positions(vec![(0.0, 179.9995), (0.0, 0.0), (0.0, -179.9998)]);
        assert_eq!(index.slots_within(0.0, -179.9995, 150.0), vec![0, 2]);
        assert_eq!(index.slots_within(0.0, 179.9995, 150.0), vec![0, 2]);
    }

    #[test]
    fn test_box_near_pole() {
        // 100 m east at 89.95 degrees is about one degree of longitude
        let (lat, lon) = (89.95, 0.0);
        let east = offset_meters(lat, lon, 0.0, 100.0);
        let index = MarkerIndex::from_positions(vec![east]);
        assert_eq!(index.slots_within(lat, lon, 150.0), vec![0]);

        // Box reaching over the pole spans every longitude
        let across = MarkerIndex::from_positions(vec![(89.9995, 170.0), (89.9995, -10.0)]);
        assert_eq!(across.slots_within(89.9995, -10.0, 150.0), vec![0, 1]);
    }

    #[test]
    fn test_slots_sorted() {
        let positions: Vec<(f64, f64)> = (0..50)
            .rev()
            .map(|i| offset_meters(ORIGIN.0, ORIGIN.1, i as f64 * 3.0, 0.0))
            .collect();
        let index = MarkerIndex::from_positions(positions);
        let slots = index.slots_within(ORIGIN.0, ORIGIN.1, 1000.0);
        assert_eq!(slots, (0..50).collect::<Vec<_>>());
    }
}
