//! In-memory bus catalog.
//!
//! Holds every known route's stop skeleton so a tracking session can be seeded
//! before the first live update arrives.

use std::collections::HashMap;
use std::future::{ready, Future};
use std::pin::Pin;
use std::sync::Arc;

use crate::identifiers::*;
use crate::models::{catalog::CatalogEntry, types::*};
use crate::network::traits::BusCatalog;

// ============================================================================
// Static Catalog
// ============================================================================

/// In-memory catalog keyed by route id
///
/// This type is cheap to clone since all data is stored in `Arc`s.
#[derive(Clone, Debug, Default)]
pub struct StaticCatalog {
    // Catalog order
    entries: Vec<Arc<CatalogEntry>>,

    // Lookup map
    entry_map: HashMap<RouteIdentifier, Arc<CatalogEntry>>,
}

impl StaticCatalog {
    /// Create a new empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Build catalog from entries; a later entry replaces an earlier one with the same route id
    pub fn from_entries(entries: Vec<CatalogEntry>) -> Self {
        let mut catalog = Self::new();
        for entry in entries {
            catalog.insert(entry);
        }
        catalog
    }

    pub fn insert(&mut self, entry: CatalogEntry) {
        let entry = Arc::new(entry);
        if let Some(previous) = self.entry_map.insert(entry.route_id.clone(), entry.clone()) {
            self.entries.retain(|e| !Arc::ptr_eq(e, &previous));
        }
        self.entries.push(entry);
    }

    pub fn get(&self, route_id: &RouteIdentifier) -> Option<Arc<CatalogEntry>> {
        self.entry_map.get(route_id).cloned()
    }

    pub fn all_routes(&self) -> &[Arc<CatalogEntry>] {
        &self.entries
    }

    /// Routes whose id, termini or stop names contain `query`
    pub fn search(&self, query: &str) -> Vec<Arc<CatalogEntry>> {
        self.entries
            .iter()
            .filter(|entry| entry.matches(query))
            .cloned()
            .collect()
    }
}

impl BusCatalog for StaticCatalog {
    fn lookup<'a>(
        &'a self,
        route_id: &'a RouteIdentifier,
    ) -> Pin<Box<dyn Future<Output = Result<CatalogEntry>> + Send + 'a>> {
        let result = self
            .get(route_id)
            .map(|entry| (*entry).clone())
            .ok_or_else(|| TransitError::RouteNotFound(route_id.clone()));
        Box::pin(ready(result))
    }
}

// ============================================================================
// JSON records
// ============================================================================

#[cfg(feature = "serde")]
pub use records::{CatalogRecord, NamedPoint, RecordStop};

#[cfg(feature = "serde")]
mod records {
    use geo::Point;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::models::catalog::Terminus;

    /// Catalog document as served by the bus info endpoint.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct CatalogRecord {
        #[serde(rename = "Route")]
        pub route: String,
        #[serde(default)]
        pub rating: f32,
        pub start_point: NamedPoint,
        pub end_point: NamedPoint,
        #[serde(default)]
        pub bus_stops: Vec<RecordStop>,
    }

    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct NamedPoint {
        pub name: String,
        pub coords: [f64; 2],
    }

    #[derive(Clone, Debug, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct RecordStop {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub stop_id: Option<String>,
        pub name: String,
        pub coords: [f64; 2],
    }

    fn point(coords: [f64; 2]) -> Result<Point> {
        validate_lon_lat(coords[0], coords[1])
    }

    impl TryFrom<CatalogRecord> for CatalogEntry {
        type Error = TransitError;

        fn try_from(record: CatalogRecord) -> Result<Self> {
            if record.route.trim().is_empty() {
                return Err(TransitError::InvalidData("catalog record without route id".into()));
            }

            let stops = record
                .bus_stops
                .into_iter()
                .enumerate()
                .map(|(i, stop)| {
                    // records from the bus info store carry no stop ids; number them in order
                    let id = stop.stop_id.unwrap_or_else(|| (i + 1).to_string());
                    Ok(Stop::new(id, stop.name, point(stop.coords)?))
                })
                .collect::<Result<Vec<_>>>()?;

            Ok(CatalogEntry {
                route_id: RouteIdentifier::new(record.route),
                rating: record.rating,
                origin: Terminus::new(record.start_point.name, point(record.start_point.coords)?),
                destination: Terminus::new(record.end_point.name, point(record.end_point.coords)?),
                stops,
            })
        }
    }

    impl StaticCatalog {
        /// Parse a JSON array of catalog records
        pub fn from_json(json: &str) -> Result<Self> {
            let records: Vec<CatalogRecord> = serde_json::from_str(json)
                .map_err(|e| TransitError::SerializationError(e.to_string()))?;

            let entries = records
                .into_iter()
                .map(CatalogEntry::try_from)
                .collect::<Result<Vec<_>>>()?;

            Ok(Self::from_entries(entries))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::catalog::Terminus;
    use geo::Point;

    fn entry(id: &str) -> CatalogEntry {
        CatalogEntry {
            route_id: RouteIdentifier::new(id),
            rating: 0.0,
            origin: Terminus::new("Garia More", Point::new(88.377639, 22.465722)),
            destination: Terminus::new("Park Circus 7 Point", Point::new(88.366083, 22.542861)),
            stops: vec![Stop::new("1", "Jadavpur", Point::new(88.3712, 22.4990))],
        }
    }

    #[test]
    fn test_empty_catalog() {
        let catalog = StaticCatalog::new();
        assert!(catalog.all_routes().is_empty());
        assert!(catalog.get(&RouteIdentifier::new("A15")).is_none());
    }

    #[test]
    fn test_catalog_lookups() {
        let catalog = StaticCatalog::from_entries(vec![entry("A15"), entry("B22")]);
        assert_eq!(catalog.all_routes().len(), 2);
        assert!(catalog.get(&RouteIdentifier::new("A15")).is_some());
        assert_eq!(catalog.search("jadav").len(), 2);
        assert_eq!(catalog.search("b22").len(), 1);
    }

    #[test]
    fn test_insert_replaces_same_route() {
        let mut catalog = StaticCatalog::from_entries(vec![entry("A15")]);
        let mut updated = entry("A15");
        updated.rating = 3.5;
        catalog.insert(updated);

        assert_eq!(catalog.all_routes().len(), 1);
        assert_eq!(catalog.get(&RouteIdentifier::new("A15")).unwrap().rating, 3.5);
    }

    #[test]
    fn test_bus_catalog_lookup_missing_route() {
        let catalog = StaticCatalog::from_entries(vec![entry("A15")]);
        let missing = RouteIdentifier::new("Z99");
        let result = poll_ready(catalog.lookup(&missing));
        assert!(matches!(result, Err(TransitError::RouteNotFound(_))));
    }

    /// Polls a future that is ready on first poll.
    fn poll_ready<F: Future>(future: F) -> F::Output {
        use std::task::{Context, Poll, Waker};

        let mut future = std::pin::pin!(future);
        let mut cx = Context::from_waker(Waker::noop());
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(output) => output,
            Poll::Pending => panic!("catalog lookup should be ready immediately"),
        }
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_from_json_records() {
        let json = r#"[
            {
                "Route": "A15",
                "rating": 4.2,
                "startPoint": { "name": "Garia More", "coords": [88.377639, 22.465722] },
                "endPoint": { "name": "Park Circus 7 Point", "coords": [88.366083, 22.542861] },
                "busStops": [
                    { "name": "Dinabandhu Andrews College", "coords": [88.3770, 22.4700] },
                    { "stopId": "JU4", "name": "Jadavpur University Gate No.4", "coords": [88.3712, 22.4990] }
                ]
            }
        ]"#;

        let catalog = StaticCatalog::from_json(json).unwrap();
        let a15 = catalog.get(&RouteIdentifier::new("A15")).unwrap();
        assert_eq!(a15.rating, 4.2);
        assert_eq!(a15.stops[0].stop_id.as_str(), "1");
        assert_eq!(a15.stops[1].stop_id.as_str(), "JU4");
        assert_eq!(a15.tracked_stops().len(), 4);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_from_json_rejects_bad_coordinates() {
        let json = r#"[{
            "Route": "A15",
            "startPoint": { "name": "Garia More", "coords": [88.37, 222.46] },
            "endPoint": { "name": "Park Circus", "coords": [88.36, 22.54] }
        }]"#;
        assert!(StaticCatalog::from_json(json).is_err());
    }
}
