//! Connection lifecycle and route subscription.

use std::fmt;
use std::sync::Arc;

use mapgeox_transit::RouteIdentifier;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{RejectReason, Result, TrackingError};
use crate::realtime::event::Outbound;
use crate::realtime::transport::{EventSink, InboundQueues, Transport};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// One physical connection to the tracking backend, multiplexed by route
/// subscription.
///
/// The channel never touches tracking state. Inbound events go to the queues
/// returned by [`RealtimeChannel::new`]; the owner feeds `Connected` and
/// `Disconnected` back through [`on_connected`](Self::on_connected) and
/// [`on_disconnected`](Self::on_disconnected).
pub struct RealtimeChannel {
    transport: Arc<dyn Transport>,
    sink: EventSink,
    state: ConnectionState,
    subscription: watch::Sender<Option<RouteIdentifier>>,
    last_error: Option<TrackingError>,
}

impl RealtimeChannel {
    pub fn new(transport: Arc<dyn Transport>) -> (Self, InboundQueues) {
        let (subscription, subscription_rx) = watch::channel(None);
        let (sink, queues) = EventSink::new(subscription_rx);

        let channel = Self {
            transport,
            sink,
            state: ConnectionState::Disconnected,
            subscription,
            last_error: None,
        };
        (channel, queues)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Route currently subscribed on the wire.
    pub fn subscription(&self) -> Option<RouteIdentifier> {
        self.subscription.borrow().clone()
    }

    pub fn last_error(&self) -> Option<&TrackingError> {
        self.last_error.as_ref()
    }

    pub fn sink(&self) -> EventSink {
        self.sink.clone()
    }

    /// Establish the transport. A no-op unless disconnected; failures are
    /// kept in [`last_error`](Self::last_error).
    pub async fn connect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            debug!(state = %self.state, "connect ignored");
            return;
        }

        self.state = ConnectionState::Connecting;
        info!("connecting to tracking backend");

        if let Err(e) = self.transport.connect(self.sink.clone()).await {
            warn!(error = %e, "failed to connect to tracking backend");
            self.state = ConnectionState::Disconnected;
            self.last_error = Some(e);
        }
    }

    /// Transport reports the connection open; replays the active subscription.
    pub async fn on_connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.last_error = None;
        info!("connected to tracking backend");

        if let Some(route_id) = self.subscription() {
            info!(route = %route_id, "re-subscribing after reconnect");
            if let Err(e) = self.send(Outbound::Subscribe(route_id)).await {
                warn!(error = %e, "re-subscribe failed");
            }
        }
    }

    /// Transport reports the connection lost. The subscription is kept for
    /// replay.
    pub fn on_disconnected(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        warn!("lost connection to tracking backend");
        self.state = ConnectionState::Disconnected;
        self.last_error = Some(TrackingError::Connection("connection lost".into()));
    }

    fn check_request(&self, route_id: &RouteIdentifier, action: &str) -> Result<()> {
        let reason = if route_id.is_empty() {
            RejectReason::EmptyRoute
        } else if !self.is_connected() {
            RejectReason::NotConnected
        } else {
            return Ok(());
        };

        warn!(route = %route_id, %reason, "{action} rejected");
        Err(TrackingError::SubscriptionRejected(reason))
    }

    /// Start receiving updates for `route_id`. Rejected, not queued, when the
    /// route id is empty or the channel is not connected.
    pub async fn subscribe(&mut self, route_id: RouteIdentifier) -> Result<()> {
        self.check_request(&route_id, "subscribe")?;

        if self.subscription().as_ref() == Some(&route_id) {
            debug!(route = %route_id, "already subscribed");
            return Ok(());
        }
        // never two routes on the wire at once
        self.unsubscribe().await;

        self.send(Outbound::Subscribe(route_id.clone())).await?;
        info!(route = %route_id, "subscribed");
        self.subscription.send_replace(Some(route_id));
        Ok(())
    }

    /// Stop delivery for the active route, if any. Returns the route that
    /// was active.
    pub async fn unsubscribe(&mut self) -> Option<RouteIdentifier> {
        let route_id = self.subscription.send_replace(None)?;

        if self.is_connected() {
            if let Err(e) = self.send(Outbound::Unsubscribe(route_id.clone())).await {
                warn!(route = %route_id, error = %e, "unsubscribe failed");
            }
        }
        info!(route = %route_id, "unsubscribed");
        Some(route_id)
    }

    /// Ask the driver to start moving the virtual bus of `route_id`.
    pub async fn request_simulation_start(&mut self, route_id: RouteIdentifier) -> Result<()> {
        self.check_request(&route_id, "simulation start")?;
        info!(route = %route_id, "requesting simulation start");
        self.send(Outbound::StartSimulation(route_id)).await
    }

    /// Close the transport; the subscription is forgotten.
    pub async fn disconnect(&mut self) {
        self.unsubscribe().await;
        if self.state == ConnectionState::Disconnected {
            return;
        }
        if let Err(e) = self.transport.disconnect().await {
            warn!(error = %e, "disconnect failed");
        }
        self.state = ConnectionState::Disconnected;
    }

    async fn send(&mut self, message: Outbound) -> Result<()> {
        debug!(event = message.event_name(), route = %message.route_id(), "emit");
        match self.transport.emit(message).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, "emit failed");
                self.last_error = Some(TrackingError::Connection(e.to_string()));
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::event::{ChannelEvent, InboundEvent, LocationUpdatePayload};
    use tokio::sync::mpsc;
    use crate::realtime::transport::testing::FakeTransport;
    use mapgeox_transit::BusIdentifier;

    async fn connected() -> (
        RealtimeChannel,
        mpsc::UnboundedReceiver<InboundEvent>,
        Arc<FakeTransport>,
    ) {
        let transport = Arc::new(FakeTransport::default());
        let (mut channel, mut queues) = RealtimeChannel::new(transport.clone());
        channel.connect().await;

        let opened = queues.lifecycle.recv().await.unwrap();
        assert_eq!(opened.event, ChannelEvent::Connected);
        channel.on_connected().await;
        (channel, queues.events, transport)
    }

    fn location(route: Option<&str>) -> ChannelEvent {
        ChannelEvent::LocationUpdate(LocationUpdatePayload {
            bus_id: BusIdentifier::new("bus"),
            speed_kmh: 20.0,
            coords: vec![88.37, 22.47],
            route_id: route.map(RouteIdentifier::new),
        })
    }

    #[tokio::test]
    async fn test_subscribe_rejected_when_disconnected() {
        let transport = Arc::new(FakeTransport::default());
        let (mut channel, _queues) = RealtimeChannel::new(transport.clone());

        let result = channel.subscribe(RouteIdentifier::new("A15")).await;
        assert!(matches!(
            result,
            Err(TrackingError::SubscriptionRejected(RejectReason::NotConnected))
        ));
        assert_eq!(channel.subscription(), None);
        assert!(transport.emitted().is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_rejects_empty_route() {
        let (mut channel, _events, transport) = connected().await;
        let result = channel.subscribe(RouteIdentifier::new("  ")).await;
        assert!(matches!(
            result,
            Err(TrackingError::SubscriptionRejected(RejectReason::EmptyRoute))
        ));
        assert!(transport.emitted().is_empty());
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let transport = Arc::new(FakeTransport::default());
        let (mut channel, mut queues) = RealtimeChannel::new(transport.clone());
        channel.connect().await;
        assert_eq!(queues.lifecycle.try_recv().unwrap().event, ChannelEvent::Connected);
        channel.on_connected().await;

        channel.connect().await;
        assert!(channel.is_connected());
        assert!(queues.lifecycle.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_lifecycle_events_bypass_message_queue() {
        let (_channel, mut events, transport) = connected().await;
        transport.push(location(None));
        transport.push(ChannelEvent::Disconnected);

        let queued: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|inbound| inbound.event)
            .collect();
        assert_eq!(queued, vec![location(None)]);
    }

    #[tokio::test]
    async fn test_connect_failure_is_recorded() {
        let transport = Arc::new(FakeTransport::refusing());
        let (mut channel, _queues) = RealtimeChannel::new(transport.clone());

        channel.connect().await;
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert!(matches!(channel.last_error(), Some(TrackingError::Connection(_))));

        transport.accept_connections();
        channel.connect().await;
        assert_eq!(channel.state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_switching_routes_unsubscribes_first() {
        let (mut channel, _events, transport) = connected().await;
        channel.subscribe(RouteIdentifier::new("A15")).await.unwrap();
        channel.subscribe(RouteIdentifier::new("A15")).await.unwrap();
        channel.subscribe(RouteIdentifier::new("B22")).await.unwrap();

        assert_eq!(
            transport.emitted(),
            vec![
                Outbound::Subscribe(RouteIdentifier::new("A15")),
                Outbound::Unsubscribe(RouteIdentifier::new("A15")),
                Outbound::Subscribe(RouteIdentifier::new("B22")),
            ]
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_when_none_is_safe() {
        let (mut channel, _events, transport) = connected().await;
        assert_eq!(channel.unsubscribe().await, None);
        assert_eq!(channel.unsubscribe().await, None);
        assert!(transport.emitted().is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_replays_subscription() {
        let (mut channel, _events, transport) = connected().await;
        channel.subscribe(RouteIdentifier::new("A15")).await.unwrap();
        transport.clear_emitted();

        channel.on_disconnected();
        assert!(!channel.is_connected());
        assert_eq!(channel.subscription(), Some(RouteIdentifier::new("A15")));

        channel.on_connected().await;
        assert_eq!(
            transport.emitted(),
            vec![Outbound::Subscribe(RouteIdentifier::new("A15"))]
        );
    }

    #[tokio::test]
    async fn test_events_tagged_at_receipt() {
        let (mut channel, mut events, transport) = connected().await;

        channel.subscribe(RouteIdentifier::new("A15")).await.unwrap();
        transport.push(location(None));

        channel.unsubscribe().await;
        transport.push(location(None));

        channel.subscribe(RouteIdentifier::new("B22")).await.unwrap();
        transport.push(location(Some("A15")));
        transport.push(location(None));

        let origins: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|inbound| inbound.origin().map(|r| r.to_string()))
            .collect();
        assert_eq!(
            origins,
            vec![
                Some("A15".to_string()),
                None,
                Some("A15".to_string()),
                Some("B22".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_simulation_start_emits_route() {
        let (mut channel, _events, transport) = connected().await;
        channel
            .request_simulation_start(RouteIdentifier::new("A15"))
            .await
            .unwrap();
        assert_eq!(
            transport.emitted(),
            vec![Outbound::StartSimulation(RouteIdentifier::new("A15"))]
        );
    }
}
