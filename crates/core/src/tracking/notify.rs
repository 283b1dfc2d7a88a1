//! Arrival notifications.

use std::fmt;

use chrono::{DateTime, Utc};
use mapgeox_transit::prelude::*;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;

/// A stop reached for the first time in a session.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Arrival {
    pub route_id: RouteIdentifier,
    pub stop_id: StopIdentifier,
    pub stop_name: String,
    pub reached_at: DateTime<Utc>,
}

impl fmt::Display for Arrival {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bus {} has reached {}", self.route_id, self.stop_name)
    }
}

/// Receives one call per newly reached stop.
pub trait ArrivalNotifier: Send + Sync {
    fn notify(&self, arrival: &Arrival);
}

/// Logs arrivals.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

impl ArrivalNotifier for TracingNotifier {
    fn notify(&self, arrival: &Arrival) {
        info!(
            route = %arrival.route_id,
            stop = %arrival.stop_id,
            reached_at = %arrival.reached_at,
            "{arrival}"
        );
    }
}

/// Forwards arrivals to a channel, e.g. for a UI layer to display.
#[derive(Clone, Debug)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<Arrival>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Arrival>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ArrivalNotifier for ChannelNotifier {
    fn notify(&self, arrival: &Arrival) {
        // receiver gone: nobody is listening anymore
        let _ = self.sender.send(arrival.clone());
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn arrival() -> Arrival {
        Arrival {
            route_id: RouteIdentifier::new("B22"),
            stop_id: StopIdentifier::new("2"),
            stop_name: "Rathtala".into(),
            reached_at: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_arrival_display() {
        assert_eq!(arrival().to_string(), "Bus B22 has reached Rathtala");
    }

    #[test]
    fn test_channel_notifier_forwards() {
        let (notifier, mut rx) = ChannelNotifier::new();
        notifier.notify(&arrival());
        assert_eq!(rx.try_recv().unwrap(), arrival());

        drop(rx);
        notifier.notify(&arrival());
    }
}
