//! The single owner of the tracking session.

use std::time::Duration;

use chrono::{DateTime, Utc};
use mapgeox_transit::prelude::*;
use tracing::{debug, info};

use crate::error::{Result, TrackingError};
use crate::tracking::session::{StopEta, TrackingSession};
use crate::tracking::timer::{RefreshTick, RefreshTimer, TickSink};

#[derive(Debug)]
struct RefreshSchedule {
    period: Duration,
    ticks: TickSink,
}

#[derive(Debug, Default)]
pub struct BusPositionStore {
    session: Option<TrackingSession>,
    // bumped on every begin/clear
    epoch: u64,
    refresh: Option<RefreshSchedule>,
    timer: Option<RefreshTimer>,
}

impl BusPositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a refresh timer for every session, sending ticks to `ticks`.
    pub fn with_refresh(mut self, period: Duration, ticks: TickSink) -> Self {
        self.refresh = Some(RefreshSchedule { period, ticks });
        self
    }

    pub fn session(&self) -> Option<&TrackingSession> {
        self.session.as_ref()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_refreshing(&self) -> bool {
        self.timer.as_ref().is_some_and(RefreshTimer::is_running)
    }

    /// Start a new session with `stops` as its skeleton, replacing any other.
    pub fn begin(&mut self, route_id: RouteIdentifier, stops: Vec<Stop>) -> &TrackingSession {
        if self.session.is_some() {
            self.clear();
        }

        self.epoch += 1;
        info!(route = %route_id, stops = stops.len(), epoch = self.epoch, "tracking session started");

        if let Some(schedule) = &self.refresh {
            self.timer = Some(RefreshTimer::start(
                schedule.period,
                self.epoch,
                schedule.ticks.clone(),
            ));
        }

        self.session.insert(TrackingSession::new(route_id, stops))
    }

    /// Drop the session and stop its refresh timer.
    pub fn clear(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop();
        }
        if let Some(session) = self.session.take() {
            info!(route = %session.route_id(), "tracking session cleared");
        }
        self.epoch += 1;
    }

    /// Whether a timer tick belongs to the live session.
    pub fn accepts_tick(&self, tick: RefreshTick) -> bool {
        self.session.is_some() && tick.epoch == self.epoch
    }

    fn active_for(&mut self, origin: &RouteIdentifier) -> Result<&mut TrackingSession> {
        let session = self.session.as_mut().ok_or(TrackingError::NoSession)?;
        if session.route_id() != origin {
            return Err(TrackingError::StaleRoute {
                received: origin.clone(),
                active: Some(session.route_id().clone()),
            });
        }
        Ok(session)
    }

    /// Replace the bus position. ETAs are left for the estimator.
    pub fn on_location_update(
        &mut self,
        origin: &RouteIdentifier,
        location: BusLocation,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let session = self.active_for(origin)?;

        validate_lon_lat(location.location.x(), location.location.y())
            .map_err(|e| TrackingError::InvalidPayload(e.to_string()))?;

        debug!(
            route = %origin,
            bus = %location.bus_id,
            lon = location.location.x(),
            lat = location.location.y(),
            speed_kmh = location.speed_kmh,
            "position update"
        );
        session.set_location(location, now);
        Ok(())
    }

    /// Replace the per-stop list with a full snapshot.
    ///
    /// The snapshot must list exactly the session's stops, in order.
    pub fn on_stop_info(&mut self, origin: &RouteIdentifier, stops: Vec<StopEta>) -> Result<()> {
        let session = self.active_for(origin)?;

        let skeleton = session.stops();
        if stops.len() != skeleton.len() {
            return Err(TrackingError::InvalidPayload(format!(
                "stop snapshot has {} stops, route {} has {}",
                stops.len(),
                origin,
                skeleton.len()
            )));
        }
        if let Some((eta, stop)) = stops
            .iter()
            .zip(skeleton)
            .find(|(eta, stop)| eta.stop_id != stop.stop_id)
        {
            return Err(TrackingError::InvalidPayload(format!(
                "stop snapshot lists {} where route {} has {}",
                eta.stop_id, origin, stop.stop_id
            )));
        }

        session.set_etas(stops);
        Ok(())
    }

    pub(crate) fn set_etas(&mut self, etas: Vec<StopEta>) {
        if let Some(session) = self.session.as_mut() {
            session.set_etas(etas);
        }
    }

    pub(crate) fn mark_reached(&mut self, stop_id: &StopIdentifier, at: DateTime<Utc>) -> bool {
        self.session
            .as_mut()
            .is_some_and(|session| session.mark_reached(stop_id, at))
    }
}
