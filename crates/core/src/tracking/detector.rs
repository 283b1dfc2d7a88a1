use mapgeox_transit::prelude::*;

use crate::tracking::session::TrackingSession;

/// Finds stops entered by the bus since the last tick.
#[derive(Clone, Copy, Debug)]
pub struct ArrivalDetector {
    capture_radius_m: f64,
}

impl ArrivalDetector {
    pub fn new(capture_radius_m: f64) -> Self {
        Self { capture_radius_m }
    }

    pub fn capture_radius_m(&self) -> f64 {
        self.capture_radius_m
    }

    /// Unreached stops within the capture radius of the current position, in
    /// route order.
    pub fn detect(&self, session: &TrackingSession) -> Vec<StopIdentifier> {
        let Some(bus) = session.location() else {
            return Vec::new();
        };

        session
            .stop_index()
            .within(bus.location, self.capture_radius_m)
            .into_iter()
            .filter(|node| !session.is_reached(&node.stop_id))
            .map(|node| node.stop_id.clone())
            .collect()
    }

    /// Stops flagged reached in the session's per-stop list but missing from
    /// the reached-set, e.g. after a server snapshot.
    pub fn reported(&self, session: &TrackingSession) -> Vec<StopIdentifier> {
        session
            .etas()
            .iter()
            .filter(|eta| eta.reached && !session.is_reached(&eta.stop_id))
            .map(|eta| eta.stop_id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::session::StopEta;
    use chrono::{TimeZone, Utc};
    use geo::Point;

    fn session() -> TrackingSession {
        TrackingSession::new(
            RouteIdentifier::new("B22"),
            vec![
                Stop::new(StopIdentifier::start(), "Garia No.6", Point::new(88.377227, 22.465693)),
                Stop::new("1", "Laxmi Narayan Colony", Point::new(88.3760, 22.4700)),
                Stop::new("2", "Rathtala", Point::new(88.3740, 22.4750)),
                Stop::new(StopIdentifier::end(), "Tollygunge Tram Depot", Point::new(88.345291, 22.493469)),
            ],
        )
    }

    #[test]
    fn test_no_position_detects_nothing() {
        assert!(ArrivalDetector::new(100.0).detect(&session()).is_empty());
    }

    #[test]
    fn test_detects_stop_in_radius() {
        let mut session = session();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        session.set_location(BusLocation::new("B22", 30.0, Point::new(88.3740, 22.4753)), now);

        let detector = ArrivalDetector::new(100.0);
        assert_eq!(detector.detect(&session), vec![StopIdentifier::new("2")]);

        session.mark_reached(&StopIdentifier::new("2"), now);
        assert!(detector.detect(&session).is_empty());

        // a tighter radius misses the ~33 m offset
        let mut fresh = self::session();
        fresh.set_location(BusLocation::new("B22", 30.0, Point::new(88.3740, 22.4753)), now);
        assert!(ArrivalDetector::new(20.0).detect(&fresh).is_empty());
    }

    #[test]
    fn test_reported_reached_flags() {
        let mut session = session();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let mut etas: Vec<StopEta> = session
            .stops()
            .iter()
            .map(|s| StopEta::pending(s.stop_id.clone()))
            .collect();
        etas[0].reached = true;
        etas[1].reached = true;
        session.set_etas(etas);
        session.mark_reached(&StopIdentifier::start(), now);

        let reported = ArrivalDetector::new(100.0).reported(&session);
        assert_eq!(reported, vec![StopIdentifier::new("1")]);
    }
}
