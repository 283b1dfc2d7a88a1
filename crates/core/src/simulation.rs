//! In-process stand-in for the tracking backend.
//!
//! Implements [`Transport`] by driving virtual buses along catalog routes and
//! broadcasting their positions to the routes this connection subscribed to.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use mapgeox_transit::prelude::*;
use mapgeox_transit::spatial::{distance_along_km, distance_km};
use mapgeox_transit::spatial::projector::distance_at_tick;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SimulationConfig;
use crate::error::{Result, TrackingError};
use crate::realtime::event::{
    BusStopInfoPayload, ChannelEvent, LocationUpdatePayload, Outbound, RouteNotice,
};
use crate::realtime::transport::{EventSink, Transport};
use crate::tracking::session::StopEta;

#[derive(Default)]
struct SimulationState {
    sink: Option<EventSink>,
    // routes ("rooms") this connection has joined
    rooms: HashSet<RouteIdentifier>,
    runs: HashMap<RouteIdentifier, JoinHandle<()>>,
}

impl SimulationState {
    fn broadcast(&self, route_id: &RouteIdentifier, event: ChannelEvent) {
        if !self.rooms.contains(route_id) {
            return;
        }
        if let Some(sink) = &self.sink {
            sink.send(event);
        }
    }

    fn notice(&self, event: ChannelEvent) {
        if let Some(sink) = &self.sink {
            sink.send(event);
        }
    }
}

pub struct SimulatedTransport {
    catalog: Arc<dyn BusCatalog>,
    config: SimulationConfig,
    capture_radius_m: f64,
    state: Arc<Mutex<SimulationState>>,
}

impl SimulatedTransport {
    pub fn new(catalog: Arc<dyn BusCatalog>, config: SimulationConfig, capture_radius_m: f64) -> Self {
        Self {
            catalog,
            config,
            capture_radius_m,
            state: Arc::new(Mutex::new(SimulationState::default())),
        }
    }

    pub async fn is_subscribed(&self, route_id: &RouteIdentifier) -> bool {
        self.state.lock().await.rooms.contains(route_id)
    }

    pub async fn is_running(&self, route_id: &RouteIdentifier) -> bool {
        self.state
            .lock()
            .await
            .runs
            .get(route_id)
            .is_some_and(|run| !run.is_finished())
    }

    /// Deliver an arbitrary event to the connected client.
    pub async fn inject(&self, event: ChannelEvent) {
        self.state.lock().await.notice(event);
    }

    /// Simulate a network drop followed by an immediate reconnect. The new
    /// connection starts with no subscriptions.
    pub async fn drop_connection(&self) {
        let mut state = self.state.lock().await;
        let Some(sink) = state.sink.clone() else {
            return;
        };
        info!("simulated connection drop");
        state.rooms.clear();
        sink.send(ChannelEvent::Disconnected);
        sink.send(ChannelEvent::Connected);
    }

    fn start(&self, route_id: RouteIdentifier) -> JoinHandle<()> {
        let catalog = self.catalog.clone();
        let state = self.state.clone();
        let config = self.config.clone();
        let radius = self.capture_radius_m;

        tokio::spawn(async move {
            let (entry, route) = match catalog.lookup(&route_id).await.and_then(|entry| {
                let route = entry.polyline()?;
                Ok((entry, route))
            }) {
                Ok(found) => found,
                Err(e) => {
                    warn!(route = %route_id, error = %e, "cannot simulate route");
                    state.lock().await.notice(ChannelEvent::Error {
                        message: format!("cannot simulate route {route_id}: {e}"),
                    });
                    return;
                }
            };

            if let Err(e) = drive(&state, entry, route, &config, radius).await {
                warn!(route = %route_id, error = %e, "simulation aborted");
            }
        })
    }
}

/// Advance one bus from start to end of `route`, one tick at a time.
async fn drive(
    state: &Mutex<SimulationState>,
    entry: CatalogEntry,
    route: Route,
    config: &SimulationConfig,
    capture_radius_m: f64,
) -> Result<()> {
    let route_id = entry.route_id.clone();
    let stops = entry.tracked_stops();
    let offsets = stops
        .iter()
        .map(|stop| distance_along_km(&route.geometry, stop.location))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    info!(route = %route_id, length_km = route.length_km, "simulation started");
    state.lock().await.notice(ChannelEvent::SimulationStarted(RouteNotice {
        route_id: route_id.clone(),
    }));

    let tick_interval = config.tick_interval();
    let mut interval = tokio::time::interval(tick_interval);
    let mut tick = 0u64;

    loop {
        interval.tick().await;

        let travelled = distance_at_tick(tick, tick_interval, config.speed_kmh).min(route.length_km);
        let position = route.point_at(travelled)?;
        let finished = travelled >= route.length_km;
        let speed_kmh = if finished { 0.0 } else { config.speed_kmh };

        let etas = stops
            .iter()
            .zip(&offsets)
            .map(|(stop, offset)| {
                let remaining_km = offset - travelled;
                let reached = remaining_km <= 0.0
                    || distance_km(position, stop.location) * 1000.0 <= capture_radius_m;
                let eta_seconds = if reached {
                    0.0
                } else {
                    (remaining_km / config.speed_kmh * 3600.0).round()
                };
                StopEta {
                    stop_id: stop.stop_id.clone(),
                    eta: None,
                    eta_seconds: Some(eta_seconds),
                    reached,
                }
            })
            .collect();

        {
            let state = state.lock().await;
            state.broadcast(
                &route_id,
                ChannelEvent::LocationUpdate(LocationUpdatePayload {
                    bus_id: BusIdentifier::new(route_id.as_str()),
                    speed_kmh,
                    coords: vec![position.x(), position.y()],
                    route_id: Some(route_id.clone()),
                }),
            );
            state.broadcast(
                &route_id,
                ChannelEvent::BusStopInfo(BusStopInfoPayload {
                    stops: etas,
                    route_id: Some(route_id.clone()),
                    bus_id: Some(BusIdentifier::new(route_id.as_str())),
                }),
            );
        }
        debug!(route = %route_id, tick, travelled_km = travelled, "simulation tick");

        if finished {
            break;
        }
        tick += 1;
    }

    info!(route = %route_id, ticks = tick, "simulation finished");
    state.lock().await.notice(ChannelEvent::SimulationFinished(RouteNotice { route_id }));
    Ok(())
}

impl Transport for SimulatedTransport {
    fn connect<'a>(&'a self, sink: EventSink) -> BoxFuture<'a, Result<()>> {
        async move {
            let mut state = self.state.lock().await;
            if state.sink.is_none() {
                sink.send(ChannelEvent::Connected);
                state.sink = Some(sink);
            }
            Ok(())
        }
        .boxed()
    }

    fn emit<'a>(&'a self, message: Outbound) -> BoxFuture<'a, Result<()>> {
        async move {
            let mut state = self.state.lock().await;
            if state.sink.is_none() {
                return Err(TrackingError::Connection("simulator is not connected".into()));
            }

            match message {
                Outbound::Subscribe(route_id) => {
                    debug!(route = %route_id, "simulator: join room");
                    state.rooms.insert(route_id);
                }
                Outbound::Unsubscribe(route_id) => {
                    debug!(route = %route_id, "simulator: leave room");
                    state.rooms.remove(&route_id);
                }
                Outbound::StartSimulation(route_id) => {
                    if let Some(previous) = state.runs.remove(&route_id) {
                        previous.abort();
                    }
                    let run = self.start(route_id.clone());
                    state.runs.insert(route_id, run);
                }
            }
            Ok(())
        }
        .boxed()
    }

    fn disconnect<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        async move {
            let mut state = self.state.lock().await;
            if let Some(sink) = state.sink.take() {
                sink.send(ChannelEvent::Disconnected);
            }
            state.rooms.clear();
            for (_, run) in state.runs.drain() {
                run.abort();
            }
            Ok(())
        }
        .boxed()
    }
}
