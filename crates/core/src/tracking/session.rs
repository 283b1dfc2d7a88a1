use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use mapgeox_transit::prelude::*;
use mapgeox_transit::spatial::index::StopIndex;
use serde::{Deserialize, Serialize};

// ============================================================================
// Stop ETA
// ============================================================================

/// Per-stop arrival estimate as shown to the rider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopEta {
    pub stop_id: StopIdentifier,
    /// Time of day, `h:mm AM/PM`; `None` while pending
    #[serde(default)]
    pub eta: Option<String>,
    #[serde(default)]
    pub eta_seconds: Option<f64>,
    #[serde(default)]
    pub reached: bool,
}

impl StopEta {
    pub fn pending(stop_id: StopIdentifier) -> Self {
        Self {
            stop_id,
            eta: None,
            eta_seconds: None,
            reached: false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.eta_seconds.is_none()
    }

    /// Whole minutes until arrival, rounded up: `"1 min"`, `"4 mins"`.
    pub fn minutes_label(&self) -> Option<String> {
        let seconds = self.eta_seconds?;
        if !seconds.is_finite() {
            return None;
        }
        let minutes = (seconds.max(0.0) / 60.0).ceil() as u64;
        Some(match minutes {
            1 => "1 min".to_string(),
            n => format!("{n} mins"),
        })
    }
}

// ============================================================================
// Tracking Session
// ============================================================================

/// Live state of the one route being tracked.
#[derive(Clone, Debug)]
pub struct TrackingSession {
    route_id: RouteIdentifier,
    stops: Vec<Stop>,
    index: StopIndex,
    location: Option<BusLocation>,
    last_update: Option<DateTime<Utc>>,
    etas: Vec<StopEta>,
    reached: BTreeMap<StopIdentifier, DateTime<Utc>>,
}

impl TrackingSession {
    pub fn new(route_id: RouteIdentifier, stops: Vec<Stop>) -> Self {
        let etas = stops
            .iter()
            .map(|stop| StopEta::pending(stop.stop_id.clone()))
            .collect();

        Self {
            route_id,
            index: StopIndex::new(&stops),
            stops,
            location: None,
            last_update: None,
            etas,
            reached: BTreeMap::new(),
        }
    }

    pub fn route_id(&self) -> &RouteIdentifier {
        &self.route_id
    }

    pub fn stops(&self) -> &[Stop] {
        &self.stops
    }

    pub fn stop(&self, stop_id: &StopIdentifier) -> Option<&Stop> {
        self.stops.iter().find(|stop| &stop.stop_id == stop_id)
    }

    pub fn stop_index(&self) -> &StopIndex {
        &self.index
    }

    pub fn location(&self) -> Option<&BusLocation> {
        self.location.as_ref()
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    pub fn etas(&self) -> &[StopEta] {
        &self.etas
    }

    pub fn reached(&self) -> &BTreeMap<StopIdentifier, DateTime<Utc>> {
        &self.reached
    }

    pub fn reached_at(&self, stop_id: &StopIdentifier) -> Option<DateTime<Utc>> {
        self.reached.get(stop_id).copied()
    }

    pub fn is_reached(&self, stop_id: &StopIdentifier) -> bool {
        self.reached.contains_key(stop_id)
    }

    pub(crate) fn set_location(&mut self, location: BusLocation, at: DateTime<Utc>) {
        self.location = Some(location);
        self.last_update = Some(at);
    }

    /// Replace the per-stop list; reached flags already recorded stay set.
    pub(crate) fn set_etas(&mut self, mut etas: Vec<StopEta>) {
        for eta in &mut etas {
            eta.reached |= self.reached.contains_key(&eta.stop_id);
        }
        self.etas = etas;
    }

    /// Returns `true` only the first time a stop is reached.
    pub(crate) fn mark_reached(&mut self, stop_id: &StopIdentifier, at: DateTime<Utc>) -> bool {
        if self.reached.contains_key(stop_id) {
            return false;
        }
        self.reached.insert(stop_id.clone(), at);
        for eta in self.etas.iter_mut().filter(|eta| &eta.stop_id == stop_id) {
            eta.reached = true;
        }
        true
    }
}
