//! # mapgeox-transit
//!
//! Bus route geometry, stop catalogs and spatial queries for live tracking.
//!
//! ## Features
//!
//! - **Route catalog**: ordered stop skeletons with `START`/`END` termini
//! - **Geodesic projection**: haversine distances and positions along polylines
//! - **Spatial queries**: R-tree based stop capture within a radius
//! - **Pluggable networking**: implement your own routing and catalog fetching
//!
//! ## Example
//!
//! ```
//! use mapgeox_transit::prelude::*;
//! use mapgeox_transit::spatial::index::StopIndex;
//! use geo::Point;
//!
//! let entry = CatalogEntry {
//!     route_id: RouteIdentifier::new("B22"),
//!     rating: 4.5,
//!     origin: Terminus::new("Garia No.6", Point::new(88.377227, 22.465693)),
//!     destination: Terminus::new("Tollygunge Tram Depot", Point::new(88.345291, 22.493469)),
//!     stops: vec![Stop::new("1", "Rathtala", Point::new(88.3740, 22.4750))],
//! };
//!
//! let catalog = StaticCatalog::from_entries(vec![entry]);
//! let b22 = catalog.get(&RouteIdentifier::new("B22")).unwrap();
//!
//! // Stops within 100 m of a bus parked at Rathtala
//! let index = StopIndex::new(&b22.tracked_stops());
//! let nearby = index.within(Point::new(88.3740, 22.4752), 100.0);
//! assert_eq!(nearby.len(), 1);
//! assert_eq!(nearby[0].stop_id.as_str(), "1");
//! ```

pub mod identifiers;
pub mod models;
pub mod network;
pub mod provider;
pub mod spatial;

// Re-exports for convenience
pub mod prelude {
    pub use crate::identifiers::*;
    pub use crate::models::{
        catalog::{CatalogEntry, Terminus},
        route::{Route, RoutePath},
        types::*,
    };
    pub use crate::network::traits::*;
    pub use crate::provider::static_provider::StaticCatalog;
}

pub use prelude::*;
