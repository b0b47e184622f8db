//! # Geographic Utilities
//!
//! Small geographic helpers shared by the monitor, viewport and controller.
//!
//! ## Overview
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`haversine_distance`] | Great-circle distance between two GPS points |
//! | [`median`] | Median of a list of values |
//! | [`median_center`] | Per-axis median of a set of GPS points |
//!
//! ## Example
//!
//! ```rust
//! use geo_heatmap::{GpsPoint, geo_utils};
//!
//! let samples = vec![
//!     GpsPoint::new(41.95, -87.75),
//!     GpsPoint::new(41.85, -87.65),
//!     GpsPoint::new(41.90, -87.70),
//! ];
//!
//! // Where to center the map
//! let center = geo_utils::median_center(&samples).unwrap();
//! assert_eq!(center, GpsPoint::new(41.90, -87.70));
//!
//! // How far apart two samples are
//! let dist = geo_utils::haversine_distance(&samples[0], &samples[1]);
//! println!("Displacement: {:.0}m", dist);
//! ```
//!
//! ## Algorithm Notes
//!
//! ### Median Centering
//!
//! The initial map region is centered on the per-axis median of all recorded samples
//! rather than the mean, so a handful of samples recorded while travelling far away
//! don't drag the view off the place where most samples live.
//!
//! ### Coordinate System
//!
//! All functions expect WGS84 coordinates (latitude/longitude in degrees), which is the
//! standard used by GPS receivers and mapping services.

use geo::{Distance, Haversine, Point};
use crate::GpsPoint;

// =============================================================================
// Distance Functions
// =============================================================================

/// Calculate the great-circle distance between two GPS points using the Haversine formula.
///
/// Returns the distance in meters along the Earth's surface (assuming a spherical Earth
/// with radius 6,371 km).
///
/// # Example
///
/// ```rust
/// use geo_heatmap::{GpsPoint, geo_utils};
///
/// let london = GpsPoint::new(51.5074, -0.1278);
/// let paris = GpsPoint::new(48.8566, 2.3522);
///
/// let distance = geo_utils::haversine_distance(&london, &paris);
/// assert!((distance - 343_560.0).abs() < 1000.0); // ~344 km
/// ```
#[inline]
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let point1 = Point::new(p1.longitude, p1.latitude);
    let point2 = Point::new(p2.longitude, p2.latitude);
    Haversine::distance(point1, point2)
}

// =============================================================================
// Centering Functions
// =============================================================================

/// Median of a list of values.
///
/// For an odd count this is the middle element of the sorted values; for an even count
/// it is the average of the two middle elements. Returns `None` for an empty slice.
/// NaN values sort last and are not filtered.
///
/// # Example
///
/// ```rust
/// use geo_heatmap::geo_utils::median;
///
/// assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
/// assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), Some(2.5));
/// assert_eq!(median(&[]), None);
/// ```
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Per-axis median of a set of GPS points.
///
/// Latitude and longitude medians are computed independently, so the result is not
/// necessarily one of the input points. Returns `None` for an empty slice.
pub fn median_center(points: &[GpsPoint]) -> Option<GpsPoint> {
    let latitudes: Vec<f64> = points.iter().map(|p| p.latitude).collect();
    let longitudes: Vec<f64> = points.iter().map(|p| p.longitude).collect();

    Some(GpsPoint::new(median(&latitudes)?, median(&longitudes)?))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    #[test]
    fn test_haversine_distance_same_point() {
        let p = GpsPoint::new(41.95, -87.75);
        assert!(approx_eq(haversine_distance(&p, &p), 0.0, 0.001));
    }

    #[test]
    fn test_haversine_distance_known_value() {
        // 0.1 degrees of latitude is ~11.1km
        let p1 = GpsPoint::new(41.85, -87.7);
        let p2 = GpsPoint::new(41.95, -87.7);
        let dist = haversine_distance(&p1, &p2);
        assert!(approx_eq(dist, 11_119.0, 50.0), "got {}", dist);
    }

    #[test]
    fn test_median_odd() {
        assert_eq!(median(&[1.0, 2.0, 3.0]), Some(2.0));
        assert_eq!(median(&[5.0]), Some(5.0));
    }

    #[test]
    fn test_median_even() {
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), Some(2.5));
        assert_eq!(median(&[4.0, 1.0]), Some(2.5));
    }

    #[test]
    fn test_median_unsorted_input() {
        assert_eq!(median(&[9.0, -3.0, 4.0, 0.0, 7.0]), Some(4.0));
    }

    #[test]
    fn test_median_empty() {
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_median_center() {
        let points = vec![
            GpsPoint::new(41.95, -87.75),
            GpsPoint::new(41.85, -87.65),
            GpsPoint::new(60.00, 10.00),
        ];
        let center = median_center(&points).unwrap();
        assert_eq!(center, GpsPoint::new(41.95, -87.65));
        assert!(median_center(&[]).is_none());
    }
}
