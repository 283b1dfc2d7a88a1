use std::fmt;

use mapgeox_transit::{RouteIdentifier, TransitError};

/// Why a subscription request was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    EmptyRoute,
    NotConnected,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::EmptyRoute => write!(f, "no route id given"),
            RejectReason::NotConnected => write!(f, "channel is not connected"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error(
        "stale event for route {received}, active route is {}",
        .active.as_ref().map_or("none", |r| r.as_str())
    )]
    StaleRoute {
        received: RouteIdentifier,
        active: Option<RouteIdentifier>,
    },

    #[error("subscription rejected: {0}")]
    SubscriptionRejected(RejectReason),

    #[error("no active tracking session")]
    NoSession,

    #[error(transparent)]
    Transit(#[from] TransitError),

    #[error("collaborator request failed: {0}")]
    Collaborator(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("tracking service has stopped")]
    ServiceStopped,
}

impl TrackingError {
    /// Errors that are part of normal operation and only worth a debug line.
    pub fn is_expected(&self) -> bool {
        matches!(self, TrackingError::StaleRoute { .. } | TrackingError::NoSession)
    }

    /// Collaborator failures keep their own variant; everything else stays a
    /// transit error.
    pub fn from_lookup(err: TransitError) -> Self {
        match err {
            TransitError::FetchFailed(message) => TrackingError::Collaborator(message),
            other => TrackingError::Transit(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, TrackingError>;
