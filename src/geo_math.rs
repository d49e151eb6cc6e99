//! Great-circle distance and the small unit helpers built on it.
//!
//! `distance_meters` is the only distance primitive in the crate. Proximity
//! checks, trip accumulation and refresh displacement all go through it so
//! they agree with each other to the last bit.

/// Mean earth radius used by the haversine formula (meters)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// m/s -> km/h
pub const MPS_TO_KMH: f64 = 3.6;

/// Haversine distance in meters between two lat/lon pairs given in degrees.
///
/// Always finite and non-negative for finite input; identical points give 0.
pub fn distance_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    // Rounding can push `a` a hair outside [0, 1] for antipodal points
    let a = a.clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Convert a device-reported speed to km/h.
///
/// Devices report 0, a negative sentinel or nothing at all when speed is
/// unavailable; all of those read as standing still.
pub fn speed_kmh(speed_mps: f64) -> f64 {
    if speed_mps.is_finite() && speed_mps > 0.0 {
        speed_mps * MPS_TO_KMH
    } else {
        0.0
    }
}

/// Shift a position by a local north/east offset in meters.
///
/// Equirectangular approximation around the origin; fine for the short hops
/// used by the mock drive and by tests.
pub fn offset_meters(lat: f64, lon: f64, north_m: f64, east_m: f64) -> (f64, f64) {
    let d_lat = north_m / EARTH_RADIUS_M;
    let d_lon = east_m / (EARTH_RADIUS_M * lat.to_radians().cos());
    (lat + d_lat.to_degrees(), lon + d_lon.to_degrees())
}

/// Validate a coordinate pair.
pub fn is_valid_coordinate(lat: f64, lon: f64) -> bool {
    lat.is_finite() && lon.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_identical_points_zero() {
        assert_eq!(distance_meters(30.8600959, 75.8610409, 30.8600959, 75.8610409), 0.0);
        assert_eq!(distance_meters(0.0, 0.0, 0.0, 0.0), 0.0);
        assert_eq!(distance_meters(-89.9, 179.9, -89.9, 179.9), 0.0);
    }

    #[test]
    fn test_symmetric() {
        let pairs = [
            (37.7749, -122.4194, 37.7849, -122.4094),
            (30.8600959, 75.8610409, 30.8611150, 75.8610131),
            (-33.8688, 151.2093, 51.5074, -0.1278),
        ];
        for (lat1, lon1, lat2, lon2) in pairs {
            assert_eq!(
                distance_meters(lat1, lon1, lat2, lon2),
                distance_meters(lat2, lon2, lat1, lon1)
            );
        }
    }

    #[test]
    fn test_thousandth_degree_latitude() {
        // 0.001 deg of latitude ~ 111 m
        let d = distance_meters(30.0, 75.0, 30.001, 75.0);
        assert_relative_eq!(d, 111.0, max_relative = 0.01);
    }

    #[test]
    fn test_matches_geo_crate() {
        use geo::{HaversineDistance, Point};

        let a = Point::new(-122.4194, 37.7749);
        let b = Point::new(-122.4094, 37.7849);
        let ours = distance_meters(37.7749, -122.4194, 37.7849, -122.4094);
        // geo uses a 6371008.8 m radius; agreement to a few ppm is expected
        assert_relative_eq!(ours, a.haversine_distance(&b), max_relative = 1e-5);
    }

    #[test]
    fn test_antipodal_is_finite() {
        let d = distance_meters(0.0, 0.0, 0.0, 180.0);
        assert!(d.is_finite());
        assert_relative_eq!(d, std::f64::consts::PI * EARTH_RADIUS_M, max_relative = 1e-9);
    }

    #[test]
    fn test_speed_kmh_sanitizes() {
        assert_relative_eq!(speed_kmh(10.0), 36.0);
        assert_eq!(speed_kmh(0.0), 0.0);
        assert_eq!(speed_kmh(-1.0), 0.0);
        assert_eq!(speed_kmh(f64::NAN), 0.0);
    }

    #[test]
    fn test_offset_meters_round_trip_distance() {
        let (lat, lon) = offset_meters(30.86, 75.86, 100.0, 0.0);
        assert_relative_eq!(distance_meters(30.86, 75.86, lat, lon), 100.0, max_relative = 1e-3);

        let (lat, lon) = offset_meters(30.86, 75.86, 0.0, 250.0);
        assert_relative_eq!(distance_meters(30.86, 75.86, lat, lon), 250.0, max_relative = 1e-3);
    }

    #[test]
    fn test_coordinate_validation() {
        assert!(is_valid_coordinate(30.86, 75.86));
        assert!(!is_valid_coordinate(91.0, 0.0));
        assert!(!is_valid_coordinate(0.0, f64::NAN));
    }
}
