//! Socket.io transport over websocket.

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use rust_socketio::asynchronous::{Client, ClientBuilder};
use rust_socketio::{Event, Payload, TransportType};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Result, TrackingError};
use crate::realtime::event::{
    BUS_STOP_INFO, ChannelEvent, LOCATION_UPDATE, Outbound, SIMULATION_FINISHED,
    SIMULATION_STARTED,
};
use crate::realtime::transport::{EventSink, Transport};

/// Reconnects on its own; every reopen is reported as `Connected`.
pub struct SocketIoTransport {
    url: String,
    client: Mutex<Option<Client>>,
}

impl SocketIoTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn first_value(payload: Payload) -> Result<Value> {
    match payload {
        Payload::Text(values) => Ok(values.into_iter().next().unwrap_or(Value::Null)),
        _ => Err(TrackingError::InvalidPayload("expected a JSON text payload".into())),
    }
}

/// Callback decoding a named server event into the sink.
fn forward(
    sink: EventSink,
    event: &'static str,
) -> impl FnMut(Payload, Client) -> BoxFuture<'static, ()> + Send + Sync + 'static {
    move |payload, _socket| {
        let sink = sink.clone();
        async move {
            match first_value(payload).and_then(|value| ChannelEvent::decode(event, value)) {
                Ok(decoded) => {
                    sink.send(decoded);
                }
                Err(e) => warn!(event, error = %e, "dropping undecodable event"),
            }
        }
        .boxed()
    }
}

/// Callback reporting a lifecycle change.
fn lifecycle(
    sink: EventSink,
    event: ChannelEvent,
) -> impl FnMut(Payload, Client) -> BoxFuture<'static, ()> + Send + Sync + 'static {
    move |_payload, _socket| {
        let sink = sink.clone();
        let event = event.clone();
        async move {
            debug!(?event, "socket lifecycle");
            sink.send(event);
        }
        .boxed()
    }
}

impl Transport for SocketIoTransport {
    fn connect<'a>(&'a self, sink: EventSink) -> BoxFuture<'a, Result<()>> {
        async move {
            let mut guard = self.client.lock().await;
            if guard.is_some() {
                return Ok(());
            }

            let client = ClientBuilder::new(self.url.as_str())
                .transport_type(TransportType::Websocket)
                .reconnect(true)
                .reconnect_on_disconnect(true)
                .on(Event::Connect, lifecycle(sink.clone(), ChannelEvent::Connected))
                .on(Event::Close, lifecycle(sink.clone(), ChannelEvent::Disconnected))
                // transport errors and server `error` events share this name
                .on(Event::Error, forward(sink.clone(), crate::realtime::event::ERROR))
                .on(LOCATION_UPDATE, forward(sink.clone(), LOCATION_UPDATE))
                .on(BUS_STOP_INFO, forward(sink.clone(), BUS_STOP_INFO))
                .on(SIMULATION_STARTED, forward(sink.clone(), SIMULATION_STARTED))
                .on(SIMULATION_FINISHED, forward(sink, SIMULATION_FINISHED))
                .connect()
                .await
                .map_err(|e| TrackingError::Connection(e.to_string()))?;

            *guard = Some(client);
            Ok(())
        }
        .boxed()
    }

    fn emit<'a>(&'a self, message: Outbound) -> BoxFuture<'a, Result<()>> {
        async move {
            let guard = self.client.lock().await;
            let client = guard
                .as_ref()
                .ok_or_else(|| TrackingError::Connection("socket is not open".into()))?;

            client
                .emit(message.event_name(), message.payload())
                .await
                .map_err(|e| TrackingError::Connection(e.to_string()))
        }
        .boxed()
    }

    fn disconnect<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        async move {
            let Some(client) = self.client.lock().await.take() else {
                return Ok(());
            };
            client
                .disconnect()
                .await
                .map_err(|e| TrackingError::Connection(e.to_string()))
        }
        .boxed()
    }
}
