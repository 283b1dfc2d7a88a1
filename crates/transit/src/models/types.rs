//! Core data types for live transit data.

use geo::Point;

use crate::identifiers::*;

// ============================================================================
// Data Structures
// ============================================================================

/// A named point of interest along a route where arrival is tracked.
///
/// Stops are ordered along their route; `START` and `END` ids are reserved
/// for the termini.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Stop {
    pub stop_id: StopIdentifier,
    pub name: String,
    #[cfg_attr(feature = "serde", serde(rename = "coords", with = "lon_lat"))]
    pub location: Point,
}

impl Stop {
    pub fn new(stop_id: impl Into<StopIdentifier>, name: impl Into<String>, location: Point) -> Self {
        Self {
            stop_id: stop_id.into(),
            name: name.into(),
            location,
        }
    }

    pub fn is_terminus(&self) -> bool {
        self.stop_id.is_terminus()
    }
}

/// Latest known position of a tracked vehicle.
///
/// Replaced wholesale on every update, never merged field by field.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct BusLocation {
    pub bus_id: BusIdentifier,
    pub speed_kmh: f64,
    #[cfg_attr(feature = "serde", serde(rename = "coords", with = "lon_lat"))]
    pub location: Point,
}

impl BusLocation {
    pub fn new(bus_id: impl Into<BusIdentifier>, speed_kmh: f64, location: Point) -> Self {
        Self {
            bus_id: bus_id.into(),
            speed_kmh,
            location,
        }
    }
}

/// Check that a lon/lat pair is finite and inside the WGS84 range.
pub fn validate_lon_lat(lon: f64, lat: f64) -> Result<Point> {
    if !lon.is_finite() || !lat.is_finite() {
        return Err(TransitError::InvalidCoordinates(format!(
            "non-finite coordinate [{lon}, {lat}]"
        )));
    }
    if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
        return Err(TransitError::InvalidCoordinates(format!(
            "coordinate [{lon}, {lat}] out of range"
        )));
    }
    Ok(Point::new(lon, lat))
}

/// `[lon, lat]` array (de)serialization for `geo::Point`.
#[cfg(feature = "serde")]
pub mod lon_lat {
    use geo::Point;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(point: &Point, serializer: S) -> Result<S::Ok, S::Error> {
        [point.x(), point.y()].serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Point, D::Error> {
        let [lon, lat] = <[f64; 2]>::deserialize(deserializer)?;
        Ok(Point::new(lon, lat))
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TransitError {
    #[error("Route not found: {0}")]
    RouteNotFound(RouteIdentifier),

    #[error("Invalid coordinates: {0}")]
    InvalidCoordinates(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Fetch failed: {0}")]
    FetchFailed(String),
}

pub type Result<T> = std::result::Result<T, TransitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_lon_lat() {
        let p = validate_lon_lat(88.377639, 22.465722).unwrap();
        assert_eq!(p.x(), 88.377639);
        assert_eq!(p.y(), 22.465722);

        assert!(validate_lon_lat(f64::NAN, 22.0).is_err());
        assert!(validate_lon_lat(88.0, f64::INFINITY).is_err());
        assert!(validate_lon_lat(200.0, 22.0).is_err());
        assert!(validate_lon_lat(88.0, -91.0).is_err());
    }

    #[test]
    fn test_stop_terminus() {
        let start = Stop::new(StopIdentifier::start(), "Garia More", Point::new(88.37, 22.46));
        let mid = Stop::new("1", "Ramgarh More", Point::new(88.37, 22.47));
        assert!(start.is_terminus());
        assert!(!mid.is_terminus());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_bus_location_wire_shape() {
        let json = r#"{"busId":"A15","speedKmh":40.0,"coords":[88.36,22.54]}"#;
        let loc: BusLocation = serde_json::from_str(json).unwrap();
        assert_eq!(loc.bus_id.as_str(), "A15");
        assert_eq!(loc.location, Point::new(88.36, 22.54));

        let back = serde_json::to_value(&loc).unwrap();
        assert_eq!(back["coords"][0], 88.36);
    }
}
