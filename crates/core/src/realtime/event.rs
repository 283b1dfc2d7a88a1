//! Wire events of the realtime channel.

use geo::Point;
use mapgeox_transit::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{Result, TrackingError};
use crate::tracking::session::StopEta;

pub const SUBSCRIBE: &str = "subscribe";
pub const UNSUBSCRIBE: &str = "unsubscribe";
pub const START_SIMULATION: &str = "startSimulation";
pub const LOCATION_UPDATE: &str = "locationUpdate";
pub const BUS_STOP_INFO: &str = "busStopInfo";
pub const SIMULATION_STARTED: &str = "simulationStarted";
pub const SIMULATION_FINISHED: &str = "simulationFinished";
pub const ERROR: &str = "error";

// ============================================================================
// Inbound
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdatePayload {
    pub bus_id: BusIdentifier,
    #[serde(default)]
    pub speed_kmh: f64,
    /// `[lon, lat]`
    pub coords: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_id: Option<RouteIdentifier>,
}

impl LocationUpdatePayload {
    /// Range checks are left to the store.
    pub fn to_location(&self) -> Result<BusLocation> {
        match self.coords.as_slice() {
            [lon, lat] => Ok(BusLocation::new(
                self.bus_id.clone(),
                self.speed_kmh,
                Point::new(*lon, *lat),
            )),
            other => Err(TrackingError::InvalidPayload(format!(
                "expected [lon, lat], got {} values",
                other.len()
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusStopInfoPayload {
    pub stops: Vec<StopEta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_id: Option<RouteIdentifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bus_id: Option<BusIdentifier>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteNotice {
    pub route_id: RouteIdentifier,
}

/// Everything the channel can hand upwards.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
    LocationUpdate(LocationUpdatePayload),
    BusStopInfo(BusStopInfoPayload),
    SimulationStarted(RouteNotice),
    SimulationFinished(RouteNotice),
    Error { message: String },
}

fn parse<T: serde::de::DeserializeOwned>(event: &str, value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| TrackingError::InvalidPayload(format!("{event}: {e}")))
}

impl ChannelEvent {
    /// Decode a named server event.
    pub fn decode(event: &str, value: Value) -> Result<Self> {
        match event {
            LOCATION_UPDATE => parse(event, value).map(ChannelEvent::LocationUpdate),
            BUS_STOP_INFO => parse(event, value).map(ChannelEvent::BusStopInfo),
            SIMULATION_STARTED => parse(event, value).map(ChannelEvent::SimulationStarted),
            SIMULATION_FINISHED => parse(event, value).map(ChannelEvent::SimulationFinished),
            ERROR => {
                let message = match &value {
                    Value::String(message) => message.clone(),
                    Value::Object(map) => match map.get("message") {
                        Some(Value::String(message)) => message.clone(),
                        _ => value.to_string(),
                    },
                    other => other.to_string(),
                };
                Ok(ChannelEvent::Error { message })
            }
            other => Err(TrackingError::InvalidPayload(format!("unknown event {other}"))),
        }
    }

    /// Connection state changes, as opposed to server messages.
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, ChannelEvent::Connected | ChannelEvent::Disconnected)
    }

    /// Route id carried by the payload itself, if any.
    pub fn route_id(&self) -> Option<&RouteIdentifier> {
        match self {
            ChannelEvent::LocationUpdate(payload) => payload.route_id.as_ref(),
            ChannelEvent::BusStopInfo(payload) => payload.route_id.as_ref(),
            ChannelEvent::SimulationStarted(notice) | ChannelEvent::SimulationFinished(notice) => {
                Some(&notice.route_id)
            }
            _ => None,
        }
    }
}

/// An event together with the subscription that was active when it arrived.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundEvent {
    pub subscription: Option<RouteIdentifier>,
    pub event: ChannelEvent,
}

impl InboundEvent {
    /// The route an event belongs to: its own tag, else the subscription at
    /// receipt.
    pub fn origin(&self) -> Option<&RouteIdentifier> {
        self.event.route_id().or(self.subscription.as_ref())
    }
}

// ============================================================================
// Outbound
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    Subscribe(RouteIdentifier),
    Unsubscribe(RouteIdentifier),
    StartSimulation(RouteIdentifier),
}

impl Outbound {
    pub fn event_name(&self) -> &'static str {
        match self {
            Outbound::Subscribe(_) => SUBSCRIBE,
            Outbound::Unsubscribe(_) => UNSUBSCRIBE,
            Outbound::StartSimulation(_) => START_SIMULATION,
        }
    }

    pub fn route_id(&self) -> &RouteIdentifier {
        match self {
            Outbound::Subscribe(route_id)
            | Outbound::Unsubscribe(route_id)
            | Outbound::StartSimulation(route_id) => route_id,
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Outbound::Subscribe(route_id) | Outbound::Unsubscribe(route_id) => {
                Value::String(route_id.to_string())
            }
            Outbound::StartSimulation(route_id) => json!({ "routeId": route_id.as_str() }),
        }
    }
}
