//! Applies channel events to the store and runs detection and estimation.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mapgeox_transit::prelude::*;
use tracing::{debug, trace};

use crate::config::TrackerConfig;
use crate::error::Result;
use crate::tracking::detector::ArrivalDetector;
use crate::tracking::estimator::EtaEstimator;
use crate::tracking::notify::{Arrival, ArrivalNotifier};
use crate::tracking::session::{StopEta, TrackingSession};
use crate::tracking::store::BusPositionStore;
use crate::tracking::timer::RefreshTick;

pub struct Tracker {
    store: BusPositionStore,
    estimator: EtaEstimator,
    detector: ArrivalDetector,
    notifier: Arc<dyn ArrivalNotifier>,
    // stops already announced this session
    notified: HashSet<StopIdentifier>,
}

impl Tracker {
    pub fn new(
        store: BusPositionStore,
        estimator: EtaEstimator,
        detector: ArrivalDetector,
        notifier: Arc<dyn ArrivalNotifier>,
    ) -> Self {
        Self {
            store,
            estimator,
            detector,
            notifier,
            notified: HashSet::new(),
        }
    }

    /// Tracker without a refresh timer.
    pub fn from_config(config: &TrackerConfig, notifier: Arc<dyn ArrivalNotifier>) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(
            BusPositionStore::new(),
            EtaEstimator::from_config(config)?,
            ArrivalDetector::new(config.capture_radius_m),
            notifier,
        ))
    }

    pub fn store(&self) -> &BusPositionStore {
        &self.store
    }

    pub fn session(&self) -> Option<&TrackingSession> {
        self.store.session()
    }

    pub fn estimator(&self) -> &EtaEstimator {
        &self.estimator
    }

    pub fn begin(&mut self, route_id: RouteIdentifier, stops: Vec<Stop>, now: DateTime<Utc>) {
        self.notified.clear();
        self.store.begin(route_id, stops);
        self.recompute(now);
    }

    pub fn clear(&mut self) {
        self.store.clear();
        self.notified.clear();
    }

    /// New position: detect arrivals first so reached stops are pinned, then
    /// re-estimate.
    pub fn on_location_update(
        &mut self,
        origin: &RouteIdentifier,
        location: BusLocation,
        now: DateTime<Utc>,
    ) -> Result<Vec<Arrival>> {
        self.store.on_location_update(origin, location, now)?;

        let entered = self
            .session()
            .map(|session| self.detector.detect(session))
            .unwrap_or_default();
        let arrivals = self.reach_all(entered, now);

        self.recompute(now);
        Ok(arrivals)
    }

    /// Server snapshot: replaces the stop list, then folds its reached flags
    /// into the reached-set.
    pub fn on_stop_info(
        &mut self,
        origin: &RouteIdentifier,
        stops: Vec<StopEta>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Arrival>> {
        self.store.on_stop_info(origin, stops)?;

        let reported = self
            .session()
            .map(|session| self.detector.reported(session))
            .unwrap_or_default();
        let arrivals = self.reach_all(reported, now);

        self.recompute(now);
        Ok(arrivals)
    }

    /// Timer tick; returns `false` for ticks of a finished session.
    pub fn on_refresh(&mut self, tick: RefreshTick, now: DateTime<Utc>) -> bool {
        if !self.store.accepts_tick(tick) {
            debug!(epoch = tick.epoch, "ignoring refresh tick from previous session");
            return false;
        }
        trace!(epoch = tick.epoch, "refreshing etas");
        self.recompute(now);
        true
    }

    fn recompute(&mut self, now: DateTime<Utc>) {
        let Some(session) = self.store.session() else {
            return;
        };
        let etas = self.estimator.estimate(session, now);
        self.store.set_etas(etas);
    }

    fn reach_all(&mut self, stop_ids: Vec<StopIdentifier>, now: DateTime<Utc>) -> Vec<Arrival> {
        stop_ids
            .into_iter()
            .filter_map(|stop_id| self.reach(stop_id, now))
            .collect()
    }

    fn reach(&mut self, stop_id: StopIdentifier, now: DateTime<Utc>) -> Option<Arrival> {
        if !self.store.mark_reached(&stop_id, now) {
            return None;
        }
        if !self.notified.insert(stop_id.clone()) {
            return None;
        }

        let session = self.store.session()?;
        let arrival = Arrival {
            route_id: session.route_id().clone(),
            stop_name: session
                .stop(&stop_id)
                .map(|stop| stop.name.clone())
                .unwrap_or_else(|| stop_id.to_string()),
            stop_id,
            reached_at: now,
        };
        self.notifier.notify(&arrival);
        Some(arrival)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackingError;
    use crate::tracking::notify::testing::RecordingNotifier;
    use chrono::{FixedOffset, TimeZone};
    use geo::{LineString, Point};
    use mapgeox_transit::spatial::point_at_distance;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 2, 30, 0).unwrap()
    }

    fn tracker(notifier: Arc<RecordingNotifier>) -> Tracker {
        let estimator = EtaEstimator::new(10.0, 80.0)
            .with_utc_offset(FixedOffset::east_opt(330 * 60).unwrap());
        Tracker::new(BusPositionStore::new(), estimator, ArrivalDetector::new(100.0), notifier)
    }

    fn line() -> LineString {
        LineString::from(vec![(88.37, 22.40), (88.37, 22.45)])
    }

    /// START, stops 1/2/3 at 1, 2 and 3 km along a due-north line, END at 4 km.
    fn route_stops() -> Vec<Stop> {
        let line = line();
        let at = |km: f64| point_at_distance(&line, km).unwrap();
        vec![
            Stop::new(StopIdentifier::start(), "North Gate", at(0.0)),
            Stop::new("1", "First", at(1.0)),
            Stop::new("2", "Second", at(2.0)),
            Stop::new("3", "Third", at(3.0)),
            Stop::new(StopIdentifier::end(), "Depot", at(4.0)),
        ]
    }

    fn t1() -> RouteIdentifier {
        RouteIdentifier::new("T1")
    }

    #[test]
    fn test_end_to_end_scenario() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut tracker = tracker(notifier.clone());
        tracker.begin(t1(), route_stops(), now());

        let at_two_km = point_at_distance(&line(), 2.0).unwrap();
        let arrivals = tracker
            .on_location_update(&t1(), BusLocation::new("T1", 40.0, at_two_km), now())
            .unwrap();

        assert_eq!(arrivals.len(), 1);
        assert_eq!(arrivals[0].stop_name, "Second");

        let etas = tracker.session().unwrap().etas();
        assert_eq!(etas[2].stop_id.as_str(), "2");
        assert!(etas[2].reached);
        assert_eq!(etas[2].eta_seconds, Some(0.0));
        assert_eq!(etas[2].eta.as_deref(), Some("8:00 AM"));

        assert_eq!(etas[3].stop_id.as_str(), "3");
        assert!(!etas[3].reached);
        assert_eq!(etas[3].eta_seconds, Some(90.0));
        assert_eq!(etas[3].eta.as_deref(), Some("8:01 AM"));
    }

    #[test]
    fn test_exactly_one_notification_for_repeated_ticks() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut tracker = tracker(notifier.clone());
        tracker.begin(t1(), route_stops(), now());

        let stop = point_at_distance(&line(), 1.0).unwrap();
        for tick in 0..50 {
            // jitter around the stop, always within 100 m
            let offset = (tick % 5) as f64 * 0.0001;
            let position = Point::new(stop.x(), stop.y() + offset);
            let at = now() + chrono::Duration::seconds(tick);
            tracker
                .on_location_update(&t1(), BusLocation::new("T1", 5.0, position), at)
                .unwrap();
        }

        assert_eq!(notifier.count_for("1"), 1);
        assert_eq!(notifier.arrivals().len(), 1);
        assert_eq!(
            tracker.session().unwrap().reached_at(&StopIdentifier::new("1")),
            Some(now())
        );
    }

    #[test]
    fn test_reached_is_monotonic() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut tracker = tracker(notifier.clone());
        tracker.begin(t1(), route_stops(), now());

        let line = line();
        let mut seen = HashSet::new();
        for step in 0..=40 {
            let km = step as f64 * 0.1;
            let position = point_at_distance(&line, km).unwrap();
            tracker
                .on_location_update(&t1(), BusLocation::new("T1", 40.0, position), now())
                .unwrap();

            // a server snapshot claiming nothing is reached changes nothing
            let blank = route_stops()
                .into_iter()
                .map(|s| StopEta::pending(s.stop_id))
                .collect();
            tracker.on_stop_info(&t1(), blank, now()).unwrap();

            for eta in tracker.session().unwrap().etas() {
                if seen.contains(&eta.stop_id) {
                    assert!(eta.reached, "{} reverted", eta.stop_id);
                }
                if eta.reached {
                    seen.insert(eta.stop_id.clone());
                }
            }
        }

        assert_eq!(seen.len(), 5);
        assert_eq!(notifier.arrivals().len(), 5);
    }

    #[test]
    fn test_stop_info_idempotent() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut tracker = tracker(notifier.clone());
        tracker.begin(t1(), route_stops(), now());

        let mut snapshot: Vec<StopEta> = route_stops()
            .into_iter()
            .map(|s| StopEta::pending(s.stop_id))
            .collect();
        snapshot[0].reached = true;

        tracker.on_stop_info(&t1(), snapshot.clone(), now()).unwrap();
        let once = tracker.session().unwrap().etas().to_vec();
        let reached_once = tracker.session().unwrap().reached().clone();

        let arrivals = tracker.on_stop_info(&t1(), snapshot, now()).unwrap();
        assert!(arrivals.is_empty());
        assert_eq!(tracker.session().unwrap().etas(), once.as_slice());
        assert_eq!(tracker.session().unwrap().reached(), &reached_once);
        assert_eq!(notifier.count_for(StopIdentifier::START), 1);
    }

    #[test]
    fn test_speed_zero_uses_floor() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut tracker = tracker(notifier);
        tracker.begin(t1(), route_stops(), now());

        let at_two_km = point_at_distance(&line(), 2.0).unwrap();
        tracker
            .on_location_update(&t1(), BusLocation::new("T1", 0.0, at_two_km), now())
            .unwrap();

        let stop_three = &tracker.session().unwrap().etas()[3];
        let seconds = stop_three.eta_seconds.unwrap();
        assert!(seconds.is_finite());
        assert_eq!(seconds, 360.0);
    }

    #[test]
    fn test_clear_resets_notifications() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut tracker = tracker(notifier.clone());
        let start = point_at_distance(&line(), 0.0).unwrap();

        tracker.begin(t1(), route_stops(), now());
        tracker
            .on_location_update(&t1(), BusLocation::new("T1", 40.0, start), now())
            .unwrap();

        tracker.clear();
        assert!(tracker.session().is_none());
        assert!(matches!(
            tracker.on_location_update(&t1(), BusLocation::new("T1", 40.0, start), now()),
            Err(TrackingError::NoSession)
        ));

        tracker.begin(t1(), route_stops(), now());
        tracker
            .on_location_update(&t1(), BusLocation::new("T1", 40.0, start), now())
            .unwrap();
        assert_eq!(notifier.count_for(StopIdentifier::START), 2);
    }

    #[test]
    fn test_refresh_ignores_old_epoch() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut tracker = tracker(notifier);
        tracker.begin(t1(), route_stops(), now());
        let epoch = tracker.store().epoch();

        assert!(tracker.on_refresh(RefreshTick { epoch }, now()));
        tracker.begin(RouteIdentifier::new("T2"), route_stops(), now());
        assert!(!tracker.on_refresh(RefreshTick { epoch }, now()));
    }

    #[test]
    fn test_refresh_advances_countdown() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut tracker = tracker(notifier);
        tracker.begin(t1(), route_stops(), now());
        let epoch = tracker.store().epoch();

        let start = point_at_distance(&line(), 0.0).unwrap();
        tracker
            .on_location_update(&t1(), BusLocation::new("T1", 40.0, start), now())
            .unwrap();
        let before = tracker.session().unwrap().etas()[4].eta.clone();

        // the bus has not moved, so the arrival time slides with the clock
        let later = now() + chrono::Duration::minutes(3);
        tracker.on_refresh(RefreshTick { epoch }, later);
        let after = tracker.session().unwrap().etas()[4].eta.clone();

        assert_ne!(before, after);
        assert_eq!(tracker.session().unwrap().etas()[4].eta_seconds, Some(360.0));
    }
}
