//! Transit data models and types.

pub mod catalog;
pub mod route;
pub mod types;

// Re-exports for convenience
pub use catalog::{CatalogEntry, Terminus};
pub use route::{Route, RoutePath};
pub use types::{validate_lon_lat, BusLocation, Result, Stop, TransitError};
