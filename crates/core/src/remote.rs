//! HTTP collaborators: OpenRouteService directions and the bus info API.

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use geo::{Coord, LineString, Point};
use geojson::{GeoJson, Value};
use mapgeox_transit::prelude::*;
use mapgeox_transit::provider::static_provider::CatalogRecord;
use serde::Serialize;
use tracing::{debug, warn};

const ORS_BASE_URL: &str = "https://api.openrouteservice.org";
const DEFAULT_PROFILE: &str = "driving-car";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Directions
// ============================================================================

/// Road geometry from the OpenRouteService GeoJSON directions endpoint.
pub struct OrsRouteFetcher {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    profile: String,
}

#[derive(Serialize)]
struct DirectionsRequest {
    coordinates: [[f64; 2]; 2],
}

impl OrsRouteFetcher {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: ORS_BASE_URL.to_string(),
            profile: DEFAULT_PROFILE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Routing profile, e.g. `driving-car` or `foot-walking`.
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    fn url(&self) -> String {
        format!(
            "{}/v2/directions/{}/geojson",
            self.base_url.trim_end_matches('/'),
            self.profile
        )
    }

    async fn fetch(&self, start: Point, end: Point) -> Result<RoutePath> {
        let url = self.url();
        debug!(%url, ?start, ?end, "requesting directions");

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, &self.api_key)
            .json(&DirectionsRequest {
                coordinates: [[start.x(), start.y()], [end.x(), end.y()]],
            })
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(fetch_failed)?;

        if !response.status().is_success() {
            return Err(TransitError::FetchFailed(format!(
                "directions HTTP {}",
                response.status()
            )));
        }

        let body = response.text().await.map_err(fetch_failed)?;
        route_from_directions(&body)
    }
}

impl RouteFetcher for OrsRouteFetcher {
    fn fetch_route<'a>(
        &'a self,
        start: Point,
        end: Point,
    ) -> Pin<Box<dyn Future<Output = Result<RoutePath>> + Send + 'a>> {
        Box::pin(self.fetch(start, end))
    }
}

fn fetch_failed(e: reqwest::Error) -> TransitError {
    TransitError::FetchFailed(e.to_string())
}

fn line_from_geojson(value: &Value) -> Result<LineString> {
    let Value::LineString(positions) = value else {
        return Err(TransitError::InvalidGeometry(
            "directions geometry is not a LineString".into(),
        ));
    };

    positions
        .iter()
        .map(|position| match position.as_slice() {
            [lon, lat, ..] => {
                validate_lon_lat(*lon, *lat)?;
                Ok(Coord { x: *lon, y: *lat })
            }
            _ => Err(TransitError::InvalidCoordinates(format!(
                "position with {} values",
                position.len()
            ))),
        })
        .collect::<Result<Vec<_>>>()
        .map(LineString::new)
}

/// Parse a directions FeatureCollection: geometry of the first feature, and
/// the distance of each step of its first segment in km.
pub fn route_from_directions(body: &str) -> Result<RoutePath> {
    let geojson = GeoJson::from_str(body).map_err(|e| TransitError::SerializationError(e.to_string()))?;

    let GeoJson::FeatureCollection(collection) = geojson else {
        return Err(TransitError::InvalidData("directions response is not a FeatureCollection".into()));
    };
    let feature = collection
        .features
        .into_iter()
        .next()
        .ok_or_else(|| TransitError::InvalidData("directions response has no route".into()))?;
    let geometry = feature
        .geometry
        .ok_or_else(|| TransitError::InvalidGeometry("route feature has no geometry".into()))?;

    let line = line_from_geojson(&geometry.value)?;
    if line.0.len() < 2 {
        return Err(TransitError::InvalidGeometry(format!(
            "route needs at least 2 points, got {}",
            line.0.len()
        )));
    }

    // properties.segments[0].steps[].distance, in metres
    let step_distances_km = feature
        .properties
        .as_ref()
        .and_then(|props| props.get("segments"))
        .and_then(|segments| segments.get(0))
        .and_then(|segment| segment.get("steps"))
        .and_then(|steps| steps.as_array())
        .map(|steps| {
            steps
                .iter()
                .filter_map(|step| step.get("distance")?.as_f64())
                .map(|metres| metres / 1000.0)
                .collect()
        })
        .unwrap_or_default();

    Ok(RoutePath {
        geometry: line,
        step_distances_km,
    })
}

// ============================================================================
// Bus Catalog
// ============================================================================

/// Catalog records served at `GET {base}/api/bus/{route}`.
pub struct HttpBusCatalog {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBusCatalog {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn fetch(&self, route_id: &RouteIdentifier) -> Result<CatalogEntry> {
        let url = format!("{}/api/bus/{}", self.base_url.trim_end_matches('/'), route_id);
        debug!(%url, "fetching catalog entry");

        let response = self
            .client
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(fetch_failed)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(TransitError::RouteNotFound(route_id.clone()));
        }
        if !status.is_success() {
            warn!(route = %route_id, %status, "catalog lookup failed");
            return Err(TransitError::FetchFailed(format!("bus info HTTP {status}")));
        }

        let record: CatalogRecord = response.json().await.map_err(fetch_failed)?;
        CatalogEntry::try_from(record)
    }
}

impl BusCatalog for HttpBusCatalog {
    fn lookup<'a>(
        &'a self,
        route_id: &'a RouteIdentifier,
    ) -> Pin<Box<dyn Future<Output = Result<CatalogEntry>> + Send + 'a>> {
        Box::pin(self.fetch(route_id))
    }
}
