//! Route geometry entities.

use geo::{LineString, Point};

use crate::identifiers::RouteIdentifier;
use crate::models::types::{validate_lon_lat, Result, TransitError};
use crate::spatial::projector::{line_length_km, point_at_distance};

/// Polyline returned by a routing service, before it is bound to a route id.
#[derive(Clone, Debug, PartialEq)]
pub struct RoutePath {
    pub geometry: LineString,
    /// Distance of each routing step (turn-by-turn leg) in kilometres.
    pub step_distances_km: Vec<f64>,
}

/// Fixed polyline a vehicle travels, with labelled termini.
///
/// Immutable for the lifetime of a tracking session.
#[derive(Clone, Debug, PartialEq)]
pub struct Route {
    pub id: RouteIdentifier,
    pub origin: String,
    pub destination: String,
    pub geometry: LineString,
    pub length_km: f64,
    pub step_distances_km: Vec<f64>,
}

impl Route {
    /// Build a route, rejecting polylines with fewer than two points or
    /// coordinates outside the lon/lat range.
    pub fn new(
        id: impl Into<RouteIdentifier>,
        origin: impl Into<String>,
        destination: impl Into<String>,
        geometry: LineString,
    ) -> Result<Self> {
        if geometry.0.len() < 2 {
            return Err(TransitError::InvalidGeometry(format!(
                "route needs at least 2 points, got {}",
                geometry.0.len()
            )));
        }
        for coord in geometry.coords() {
            validate_lon_lat(coord.x, coord.y)?;
        }

        let length_km = line_length_km(&geometry);
        Ok(Self {
            id: id.into(),
            origin: origin.into(),
            destination: destination.into(),
            geometry,
            length_km,
            step_distances_km: Vec::new(),
        })
    }

    pub fn from_path(
        id: impl Into<RouteIdentifier>,
        origin: impl Into<String>,
        destination: impl Into<String>,
        path: RoutePath,
    ) -> Result<Self> {
        let mut route = Self::new(id, origin, destination, path.geometry)?;
        route.step_distances_km = path.step_distances_km;
        Ok(route)
    }

    pub fn start(&self) -> Point {
        self.geometry.0[0].into()
    }

    pub fn end(&self) -> Point {
        self.geometry.0[self.geometry.0.len() - 1].into()
    }

    /// Point reached after `km` along the route, clamped to its ends.
    pub fn point_at(&self, km: f64) -> Result<Point> {
        point_at_distance(&self.geometry, km)
    }
}
