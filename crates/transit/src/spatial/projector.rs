//! Geodesic projection along route polylines.
//!
//! Pure functions over `geo` primitives. Coordinates are lon/lat degrees
//! (x = longitude, y = latitude), distances are kilometres.

use std::time::Duration;

use geo::{Closest, ClosestPoint, HaversineDistance, HaversineIntermediate, LineString, Point};

use crate::models::types::{Result, TransitError};

/// Great-circle distance between two points in kilometres.
pub fn distance_km(a: Point, b: Point) -> f64 {
    a.haversine_distance(&b) / 1000.0
}

/// Total length of a polyline in kilometres.
pub fn line_length_km(line: &LineString) -> f64 {
    line.lines()
        .map(|segment| distance_km(segment.start.into(), segment.end.into()))
        .sum()
}

/// The point reached after travelling `km` along `line` from its start.
///
/// Clamped to the line: distances past the end return the final coordinate
/// exactly, distances at or below zero return the first one.
pub fn point_at_distance(line: &LineString, km: f64) -> Result<Point> {
    let first = line
        .points()
        .next()
        .ok_or_else(|| TransitError::InvalidGeometry("empty polyline".into()))?;

    if km.is_nan() {
        return Err(TransitError::InvalidData("distance along line is NaN".into()));
    }
    if km <= 0.0 {
        return Ok(first);
    }

    let mut travelled = 0.0;
    for segment in line.lines() {
        let start = Point::from(segment.start);
        let end = Point::from(segment.end);
        let length = distance_km(start, end);

        if length > 0.0 && travelled + length > km {
            let fraction = (km - travelled) / length;
            return Ok(start.haversine_intermediate(&end, fraction));
        }
        travelled += length;
    }

    // at or past the end: no extrapolation
    Ok(line.points().last().unwrap_or(first))
}

/// Converts elapsed simulation ticks into a point along the line.
pub fn position_at_tick(
    line: &LineString,
    tick: u64,
    tick_interval: Duration,
    speed_kmh: f64,
) -> Result<Point> {
    point_at_distance(line, distance_at_tick(tick, tick_interval, speed_kmh))
}

/// Kilometres covered after `tick` ticks at a constant speed.
pub fn distance_at_tick(tick: u64, tick_interval: Duration, speed_kmh: f64) -> f64 {
    let step_km = speed_kmh.max(0.0) / 3600.0 * tick_interval.as_secs_f64();
    step_km * tick as f64
}

/// Distance from the start of `line` to the position closest to `point`.
pub fn distance_along_km(line: &LineString, point: Point) -> Result<f64> {
    let mut best: Option<(f64, f64)> = None; // (offset from line, distance along)
    let mut travelled = 0.0;

    for segment in line.lines() {
        let start = Point::from(segment.start);
        let closest = match segment.closest_point(&point) {
            Closest::Intersection(p) | Closest::SinglePoint(p) => p,
            Closest::Indeterminate => start,
        };

        let offset = distance_km(point, closest);
        let along = travelled + distance_km(start, closest);
        if best.map_or(true, |(best_offset, _)| offset < best_offset) {
            best = Some((offset, along));
        }
        travelled += distance_km(start, segment.end.into());
    }

    match best {
        Some((_, along)) => Ok(along),
        None if line.0.len() == 1 => Ok(0.0),
        None => Err(TransitError::InvalidGeometry("empty polyline".into())),
    }
}
