//! Transport seam under the realtime channel.
//!
//! A transport owns the physical connection. It reports lifecycle changes and
//! server events through an [`EventSink`] and sends [`Outbound`] messages.

use futures_util::future::BoxFuture;
use mapgeox_transit::RouteIdentifier;
use tokio::sync::{mpsc, watch};

use crate::error::Result;
use crate::realtime::event::{ChannelEvent, InboundEvent, Outbound};

/// Receiving halves of the inbound queues.
///
/// `Connected`/`Disconnected` travel on their own queue so the owner can
/// apply them ahead of anything else; server messages keep arrival order on
/// `events`.
#[derive(Debug)]
pub struct InboundQueues {
    pub lifecycle: mpsc::UnboundedReceiver<InboundEvent>,
    pub events: mpsc::UnboundedReceiver<InboundEvent>,
}

/// Sending half of the inbound queues.
///
/// Stamps every event with the subscription active at the moment it is
/// received, before it waits in a queue.
#[derive(Clone, Debug)]
pub struct EventSink {
    lifecycle: mpsc::UnboundedSender<InboundEvent>,
    events: mpsc::UnboundedSender<InboundEvent>,
    subscription: watch::Receiver<Option<RouteIdentifier>>,
}

impl EventSink {
    pub(crate) fn new(subscription: watch::Receiver<Option<RouteIdentifier>>) -> (Self, InboundQueues) {
        let (lifecycle_tx, lifecycle_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let sink = Self {
            lifecycle: lifecycle_tx,
            events: events_tx,
            subscription,
        };
        let queues = InboundQueues {
            lifecycle: lifecycle_rx,
            events: events_rx,
        };
        (sink, queues)
    }

    /// Returns `false` once the receiving side is gone.
    pub fn send(&self, event: ChannelEvent) -> bool {
        let queue = if event.is_lifecycle() {
            &self.lifecycle
        } else {
            &self.events
        };
        let subscription = self.subscription.borrow().clone();
        queue
            .send(InboundEvent {
                subscription,
                event,
            })
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

pub trait Transport: Send + Sync {
    /// Open the connection. `Connected`/`Disconnected` are reported through
    /// the sink, including those caused by the transport's own reconnects.
    fn connect<'a>(&'a self, sink: EventSink) -> BoxFuture<'a, Result<()>>;

    fn emit<'a>(&'a self, message: Outbound) -> BoxFuture<'a, Result<()>>;

    fn disconnect<'a>(&'a self) -> BoxFuture<'a, Result<()>>;
}
