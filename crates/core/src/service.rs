//! The live tracking service.
//!
//! [`LiveTracker`] is a handle to one dispatcher task that owns the realtime
//! channel and the tracking state. Connection changes, commands, server
//! messages and refresh ticks are queued and applied by that task one at a
//! time, in that order of priority. Readers follow a [`TrackingSnapshot`] over
//! a `watch` channel.

use std::sync::Arc;

use mapgeox_transit::prelude::*;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::TrackerConfig;
use crate::error::{RejectReason, Result, TrackingError};
use crate::realtime::channel::{ConnectionState, RealtimeChannel};
use crate::realtime::event::{ChannelEvent, InboundEvent};
use crate::realtime::transport::{InboundQueues, Transport};
use crate::tracking::{
    ArrivalDetector, ArrivalNotifier, BusPositionStore, EtaEstimator, RefreshTick, StopEta,
    Tracker,
};

// ============================================================================
// Snapshot
// ============================================================================

/// Read-only view of the tracking state.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSnapshot {
    pub route_id: Option<RouteIdentifier>,
    pub location: Option<BusLocation>,
    pub stops: Vec<StopEta>,
    pub connected: bool,
    /// Incremented on every published change
    pub generation: u64,
}

// ============================================================================
// Commands
// ============================================================================

type Reply = oneshot::Sender<Result<()>>;

enum Command {
    Connect(Reply),
    Track {
        route_id: RouteIdentifier,
        stops: Vec<Stop>,
        // reject instead of deferring when disconnected
        strict: bool,
        reply: Reply,
    },
    Unsubscribe(Reply),
    Clear(Reply),
    StartSimulation(RouteIdentifier, Reply),
    Dispose(Reply),
}

// ============================================================================
// Live Tracker
// ============================================================================

pub struct LiveTracker {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<TrackingSnapshot>,
    catalog: Arc<dyn BusCatalog>,
    task: Option<JoinHandle<()>>,
}

impl LiveTracker {
    /// Start the service and begin connecting. Must be called from within a
    /// tokio runtime.
    pub fn create(
        config: &TrackerConfig,
        transport: Arc<dyn Transport>,
        catalog: Arc<dyn BusCatalog>,
        notifier: Arc<dyn ArrivalNotifier>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let (ticks_tx, ticks_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(TrackingSnapshot::default());

        let (channel, inbound) = RealtimeChannel::new(transport);
        let tracker = Tracker::new(
            BusPositionStore::new().with_refresh(config.refresh_interval(), ticks_tx),
            EtaEstimator::from_config(config)?,
            ArrivalDetector::new(config.capture_radius_m),
            notifier,
        );

        let dispatcher = Dispatcher {
            channel,
            tracker,
            clock,
            target: None,
            snapshots: snapshot_tx,
        };
        let task = tokio::spawn(dispatcher.run(commands_rx, inbound, ticks_rx));

        Ok(Self {
            commands: commands_tx,
            snapshots: snapshot_rx,
            catalog,
            task: Some(task),
        })
    }

    pub fn snapshot(&self) -> TrackingSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn snapshots(&self) -> watch::Receiver<TrackingSnapshot> {
        self.snapshots.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.snapshots.borrow().connected
    }

    async fn request(&self, build: impl FnOnce(Reply) -> Command) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| TrackingError::ServiceStopped)?;
        response.await.map_err(|_| TrackingError::ServiceStopped)?
    }

    /// Retry connecting after a failure; a no-op while connected.
    pub async fn connect(&self) -> Result<()> {
        self.request(Command::Connect).await
    }

    /// Switch to `route_id`: the old route is unsubscribed and its session
    /// cleared before the new one starts. When disconnected, the subscription
    /// is made as soon as the channel connects.
    pub async fn track(&self, route_id: impl Into<RouteIdentifier>) -> Result<()> {
        self.start_tracking(route_id.into(), false).await
    }

    /// Like [`track`](Self::track) but rejected outright when the channel is
    /// not connected.
    pub async fn subscribe(&self, route_id: impl Into<RouteIdentifier>) -> Result<()> {
        self.start_tracking(route_id.into(), true).await
    }

    async fn start_tracking(&self, route_id: RouteIdentifier, strict: bool) -> Result<()> {
        if route_id.is_empty() {
            warn!("track rejected: empty route id");
            return Err(TrackingError::SubscriptionRejected(RejectReason::EmptyRoute));
        }
        if strict && !self.is_connected() {
            warn!(route = %route_id, "subscribe rejected: channel is not connected");
            return Err(TrackingError::SubscriptionRejected(RejectReason::NotConnected));
        }

        let entry = self
            .catalog
            .lookup(&route_id)
            .await
            .map_err(TrackingError::from_lookup)?;
        let stops = entry.tracked_stops();

        self.request(|reply| Command::Track {
            route_id,
            stops,
            strict,
            reply,
        })
        .await
    }

    /// Stop receiving updates and drop the session.
    pub async fn unsubscribe(&self) -> Result<()> {
        self.request(Command::Unsubscribe).await
    }

    /// Drop the session, e.g. when the rider dismisses the route.
    pub async fn clear(&self) -> Result<()> {
        self.request(Command::Clear).await
    }

    pub async fn request_simulation_start(&self, route_id: impl Into<RouteIdentifier>) -> Result<()> {
        let route_id = route_id.into();
        self.request(|reply| Command::StartSimulation(route_id, reply)).await
    }

    /// Unsubscribe, stop timers, close the connection and wait for the
    /// dispatcher to finish.
    pub async fn dispose(mut self) -> Result<()> {
        let result = self.request(Command::Dispose).await;
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "dispatcher task failed");
            }
        }
        result
    }
}

impl Drop for LiveTracker {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

struct Dispatcher {
    channel: RealtimeChannel,
    tracker: Tracker,
    clock: Arc<dyn Clock>,
    // route the rider wants, subscribed once the channel allows it
    target: Option<RouteIdentifier>,
    snapshots: watch::Sender<TrackingSnapshot>,
}

impl Dispatcher {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        inbound: InboundQueues,
        mut ticks: mpsc::UnboundedReceiver<RefreshTick>,
    ) {
        let InboundQueues {
            mut lifecycle,
            mut events,
        } = inbound;

        self.channel.connect().await;
        self.publish();

        loop {
            tokio::select! {
                biased;

                // a command must see the connection state the transport
                // already reported
                Some(inbound) = lifecycle.recv() => self.handle_event(inbound).await,
                command = commands.recv() => match command {
                    Some(Command::Dispose(reply)) => {
                        self.shutdown().await;
                        self.reply(reply, Ok(()));
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                Some(inbound) = events.recv() => self.handle_event(inbound).await,
                Some(tick) = ticks.recv() => {
                    let now = self.clock.now();
                    if !self.tracker.on_refresh(tick, now) {
                        continue;
                    }
                }
            }

            self.publish();
        }

        debug!("dispatcher stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(reply) => {
                self.channel.connect().await;
                let result = match (self.channel.state(), self.channel.last_error()) {
                    (ConnectionState::Disconnected, Some(e)) => {
                        Err(TrackingError::Connection(e.to_string()))
                    }
                    _ => Ok(()),
                };
                self.reply(reply, result);
            }
            Command::Track {
                route_id,
                stops,
                strict,
                reply,
            } => {
                let result = self.track(route_id, stops, strict).await;
                self.reply(reply, result);
            }
            Command::Unsubscribe(reply) => {
                self.channel.unsubscribe().await;
                self.target = None;
                self.tracker.clear();
                self.reply(reply, Ok(()));
            }
            Command::Clear(reply) => {
                self.target = None;
                self.tracker.clear();
                self.reply(reply, Ok(()));
            }
            Command::StartSimulation(route_id, reply) => {
                let result = self.channel.request_simulation_start(route_id).await;
                self.reply(reply, result);
            }
            Command::Dispose(reply) => {
                // handled by the run loop
                self.reply(reply, Ok(()));
            }
        }
    }

    /// Publish before answering so callers observe their own change.
    fn reply(&self, reply: Reply, result: Result<()>) {
        self.publish();
        let _ = reply.send(result);
    }

    async fn track(&mut self, route_id: RouteIdentifier, stops: Vec<Stop>, strict: bool) -> Result<()> {
        if strict && !self.channel.is_connected() {
            return Err(TrackingError::SubscriptionRejected(RejectReason::NotConnected));
        }

        // old route off the wire before its session goes away
        self.channel.unsubscribe().await;
        self.tracker.clear();

        let now = self.clock.now();
        self.tracker.begin(route_id.clone(), stops, now);
        self.target = Some(route_id.clone());

        match self.channel.subscribe(route_id.clone()).await {
            Err(TrackingError::SubscriptionRejected(RejectReason::NotConnected)) if !strict => {
                info!(route = %route_id, "not connected yet, subscribing once connected");
                Ok(())
            }
            other => other,
        }
    }

    async fn handle_event(&mut self, inbound: InboundEvent) {
        let now = self.clock.now();
        let origin = inbound.origin().cloned();

        match inbound.event {
            ChannelEvent::Connected => {
                self.channel.on_connected().await;
                self.subscribe_target().await;
            }
            ChannelEvent::Disconnected => self.channel.on_disconnected(),
            ChannelEvent::LocationUpdate(payload) => {
                let Some(origin) = origin else {
                    debug!("dropping location update received while unsubscribed");
                    return;
                };
                let result = payload
                    .to_location()
                    .and_then(|location| self.tracker.on_location_update(&origin, location, now));
                contain("locationUpdate", result);
            }
            ChannelEvent::BusStopInfo(payload) => {
                let Some(origin) = origin else {
                    debug!("dropping stop info received while unsubscribed");
                    return;
                };
                let result = self.tracker.on_stop_info(&origin, payload.stops, now);
                contain("busStopInfo", result);
            }
            ChannelEvent::SimulationStarted(notice) => {
                info!(route = %notice.route_id, "simulation started");
            }
            ChannelEvent::SimulationFinished(notice) => {
                info!(route = %notice.route_id, "simulation finished");
            }
            ChannelEvent::Error { message } => warn!(%message, "channel error"),
        }
    }

    /// The channel may have connected after the rider picked a route, or the
    /// server may have dropped our subscription with the connection.
    async fn subscribe_target(&mut self) {
        let Some(target) = self.target.clone() else {
            return;
        };
        if self.channel.subscription().as_ref() == Some(&target) {
            return;
        }
        if let Err(e) = self.channel.subscribe(target.clone()).await {
            warn!(route = %target, error = %e, "subscribe after connect failed");
        }
    }

    async fn shutdown(&mut self) {
        info!("shutting down live tracker");
        self.target = None;
        self.tracker.clear();
        self.channel.disconnect().await;
    }

    fn publish(&self) {
        let connected = self.channel.is_connected();
        let session = self.tracker.session();
        let next = TrackingSnapshot {
            route_id: session.map(|s| s.route_id().clone()),
            location: session.and_then(|s| s.location().cloned()),
            stops: session.map(|s| s.etas().to_vec()).unwrap_or_default(),
            connected,
            generation: 0,
        };

        self.snapshots.send_if_modified(|current| {
            let generation = current.generation;
            let unchanged = current.route_id == next.route_id
                && current.location == next.location
                && current.stops == next.stops
                && current.connected == next.connected;
            if unchanged {
                return false;
            }
            *current = TrackingSnapshot {
                generation: generation + 1,
                ..next
            };
            true
        });
    }
}

/// Log and swallow an event-handling error.
fn contain<T>(event: &str, result: Result<T>) {
    match result {
        Ok(_) => {}
        Err(e) if e.is_expected() => debug!(event, error = %e, "event discarded"),
        Err(e) => warn!(event, error = %e, "event dropped"),
    }
}
