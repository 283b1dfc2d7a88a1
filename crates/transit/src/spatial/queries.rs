//! Spatial query utilities for distance calculations.
//!
//! Uses Haversine formula for accurate distances on Earth's surface.

use geo::{HaversineDistance, Point};

/// Calculate Haversine distance between two points in meters
pub fn haversine_distance(p1: Point, p2: Point) -> f64 {
    p1.haversine_distance(&p2)
}

/// Mean earth radius used by `geo`'s haversine, in meters.
pub const MEAN_EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Degrees of latitude spanned by `meters` (for bounding box queries).
pub fn meters_to_degrees(meters: f64) -> f64 {
    (meters / MEAN_EARTH_RADIUS_M).to_degrees()
}

/// Widest longitude offset, in degrees, of a circle of `meters` around a
/// point at `latitude`.
///
/// Longitude degrees shrink towards the poles, so a radius in meters covers
/// more of them the further from the equator the query is. Near a pole the
/// circle wraps and the whole longitude range is returned.
pub fn meters_to_longitude_degrees(meters: f64, latitude: f64) -> f64 {
    let angular = meters / MEAN_EARTH_RADIUS_M;
    let cos = latitude.to_radians().cos().abs();
    let ratio = angular.sin() / cos;
    if !ratio.is_finite() || ratio >= 1.0 {
        return 180.0;
    }
    ratio.asin().to_degrees()
}
