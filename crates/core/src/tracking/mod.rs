//! Client-side projection of a tracked bus: position, per-stop ETAs and
//! arrivals.

pub mod detector;
pub mod estimator;
pub mod notify;
pub mod session;
pub mod store;
pub mod timer;
pub mod tracker;

pub use detector::ArrivalDetector;
pub use estimator::EtaEstimator;
pub use notify::{Arrival, ArrivalNotifier, ChannelNotifier, TracingNotifier};
pub use session::{StopEta, TrackingSession};
pub use store::BusPositionStore;
pub use timer::{RefreshTick, RefreshTimer};
pub use tracker::Tracker;
