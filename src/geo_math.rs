//! Distance and speed helpers shared by the point filter and the engine.

use geo::{GeodesicDistance, HaversineDistance, Point};

const MPS_TO_KMH: f64 = 3.6;

/// Geodesic distance on the WGS84 ellipsoid, in meters.
pub fn distance_meters(from: Point<f64>, to: Point<f64>) -> f64 {
    let d = from.geodesic_distance(&to);
    if d.is_finite() {
        d.max(0.0)
    } else {
        // Karney's solver does not converge for a handful of near-antipodal
        // pairs; the spherical value is good enough there.
        from.haversine_distance(&to).max(0.0)
    }
}

/// Provider speed (m/s) to km/h. Missing, negative or NaN input is 0.
pub fn speed_kmh(meters_per_second: Option<f64>) -> f64 {
    match meters_per_second {
        Some(mps) if mps >= 0.0 => mps * MPS_TO_KMH,
        _ => 0.0,
    }
}

/// Mean speed over a session. Zero duration yields 0.
pub fn average_speed_kmh(distance_meters: f64, duration_seconds: u64) -> f64 {
    if duration_seconds == 0 {
        return 0.0;
    }
    (distance_meters / 1000.0) / (duration_seconds as f64 / 3600.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_same_point_is_zero() {
        let p = Point::new(-3.7038, 40.4168);
        assert_eq!(distance_meters(p, p), 0.0);
    }

    #[test]
    fn test_one_degree_of_latitude() {
        // One degree along a meridian at the equator is ~110.574 km on WGS84
        let a = Point::new(0.0, 0.0);
        let b = Point::new(0.0, 1.0);
        assert_relative_eq!(distance_meters(a, b), 110_574.0, max_relative = 1e-4);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = Point::new(2.1734, 41.3851);
        let b = Point::new(2.1744, 41.3861);
        assert_relative_eq!(distance_meters(a, b), distance_meters(b, a), epsilon = 1e-9);
    }

    #[test]
    fn test_speed_conversion() {
        assert_relative_eq!(speed_kmh(Some(10.0)), 36.0);
        assert_eq!(speed_kmh(Some(0.0)), 0.0);
        assert_eq!(speed_kmh(Some(-1.5)), 0.0);
        assert_eq!(speed_kmh(Some(f64::NAN)), 0.0);
        assert_eq!(speed_kmh(None), 0.0);
    }

    #[test]
    fn test_average_speed() {
        assert_relative_eq!(average_speed_kmh(5000.0, 1800), 10.0);
        assert_eq!(average_speed_kmh(5000.0, 0), 0.0);
    }
}
