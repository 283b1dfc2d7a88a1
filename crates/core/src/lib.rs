//! Live bus position and ETA tracking.
//!
//! A [`LiveTracker`] keeps one realtime connection to the tracking backend,
//! follows a single route at a time, and publishes [`TrackingSnapshot`]s with
//! the bus position and per-stop ETAs. Arrivals at stops are announced once
//! per session through an [`ArrivalNotifier`].

pub mod clock;
pub mod config;
pub mod error;
pub mod realtime;
pub mod remote;
pub mod service;
pub mod simulation;
pub mod tracking;

// Re-export transit from the transit crate
pub use mapgeox_transit as transit;

pub use clock::{Clock, SystemClock};
pub use config::{SimulationConfig, TrackerConfig};
pub use error::{RejectReason, Result, TrackingError};
pub use realtime::{SocketIoTransport, Transport};
pub use remote::{HttpBusCatalog, OrsRouteFetcher};
pub use service::{LiveTracker, TrackingSnapshot};
pub use simulation::SimulatedTransport;
pub use tracking::{Arrival, ArrivalNotifier, ChannelNotifier, StopEta, TracingNotifier};
