//! Bus catalog entries: the stop skeleton of a route before live data arrives.

use geo::{LineString, Point};

use crate::identifiers::{RouteIdentifier, StopIdentifier};
use crate::models::route::Route;
use crate::models::types::{Result, Stop};

/// Named route terminus.
#[derive(Clone, Debug, PartialEq)]
pub struct Terminus {
    pub name: String,
    pub location: Point,
}

impl Terminus {
    pub fn new(name: impl Into<String>, location: Point) -> Self {
        Self {
            name: name.into(),
            location,
        }
    }
}

/// Catalog record of one bus route: termini, ordered stops and rating.
#[derive(Clone, Debug, PartialEq)]
pub struct CatalogEntry {
    pub route_id: RouteIdentifier,
    /// Average rider rating (0 when unrated)
    pub rating: f32,
    pub origin: Terminus,
    pub destination: Terminus,
    /// Intermediate stops, in route order, without the termini
    pub stops: Vec<Stop>,
}

impl CatalogEntry {
    /// Ordered stops tracked for this route: `START`, intermediate stops, `END`.
    pub fn tracked_stops(&self) -> Vec<Stop> {
        let mut stops = Vec::with_capacity(self.stops.len() + 2);
        stops.push(Stop::new(
            StopIdentifier::start(),
            self.origin.name.clone(),
            self.origin.location,
        ));
        stops.extend(self.stops.iter().filter(|s| !s.is_terminus()).cloned());
        stops.push(Stop::new(
            StopIdentifier::end(),
            self.destination.name.clone(),
            self.destination.location,
        ));
        stops
    }

    /// Straight-segment route through every tracked stop.
    ///
    /// Used when no routing service is available to provide road geometry.
    pub fn polyline(&self) -> Result<Route> {
        let geometry: LineString = self
            .tracked_stops()
            .iter()
            .map(|stop| stop.location.0)
            .collect();

        Route::new(
            self.route_id.clone(),
            self.origin.name.clone(),
            self.destination.name.clone(),
            geometry,
        )
    }

    /// Case-insensitive match on route id, termini and stop names.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return false;
        }

        self.route_id.as_str().to_lowercase().contains(&query)
            || self.origin.name.to_lowercase().contains(&query)
            || self.destination.name.to_lowercase().contains(&query)
            || self.stops.iter().any(|s| s.name.to_lowercase().contains(&query))
    }
}
