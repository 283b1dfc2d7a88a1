//! Collaborator traits.
//!
//! External crates implement these to provide routing and catalog data.

use std::future::Future;
use std::pin::Pin;

use geo::Point;

use crate::identifiers::RouteIdentifier;
use crate::models::catalog::CatalogEntry;
use crate::models::route::RoutePath;
use crate::models::types::Result;

/// Road geometry between two coordinates
pub trait RouteFetcher: Send + Sync {
    fn fetch_route<'a>(
        &'a self,
        start: Point,
        end: Point,
    ) -> Pin<Box<dyn Future<Output = Result<RoutePath>> + Send + 'a>>;
}

/// Ordered stops, termini and rating of a bus route
pub trait BusCatalog: Send + Sync {
    fn lookup<'a>(
        &'a self,
        route_id: &'a RouteIdentifier,
    ) -> Pin<Box<dyn Future<Output = Result<CatalogEntry>> + Send + 'a>>;
}
