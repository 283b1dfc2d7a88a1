//! ETA estimation from position, clamped speed and wall-clock time.

use chrono::{DateTime, Duration, FixedOffset, Local, Utc};
use geo::Point;
use mapgeox_transit::spatial::distance_km;

use crate::config::TrackerConfig;
use crate::error::Result;
use crate::tracking::session::{StopEta, TrackingSession};

const TIME_FORMAT: &str = "%-I:%M %p";

#[derive(Clone, Debug)]
pub struct EtaEstimator {
    speed_floor_kmh: f64,
    speed_ceiling_kmh: f64,
    utc_offset: Option<FixedOffset>,
    stale_after: Option<Duration>,
}

impl EtaEstimator {
    pub fn new(speed_floor_kmh: f64, speed_ceiling_kmh: f64) -> Self {
        Self {
            speed_floor_kmh,
            speed_ceiling_kmh: speed_ceiling_kmh.max(speed_floor_kmh),
            utc_offset: None,
            stale_after: None,
        }
    }

    pub fn from_config(config: &TrackerConfig) -> Result<Self> {
        let mut estimator = Self::new(config.speed_floor_kmh, config.speed_ceiling_kmh);
        estimator.utc_offset = config.utc_offset()?;
        estimator.stale_after = config.stale_after();
        Ok(estimator)
    }

    pub fn with_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.utc_offset = Some(offset);
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = Some(stale_after);
        self
    }

    /// Speed clamped to the configured bounds; NaN falls back to the floor.
    pub fn effective_speed(&self, speed_kmh: f64) -> f64 {
        if speed_kmh.is_nan() {
            return self.speed_floor_kmh;
        }
        speed_kmh.clamp(self.speed_floor_kmh, self.speed_ceiling_kmh)
    }

    /// Whole seconds needed to cover the distance between two points.
    pub fn seconds_between(&self, from: Point, to: Point, speed_kmh: f64) -> f64 {
        let hours = distance_km(from, to) / self.effective_speed(speed_kmh);
        (hours * 3600.0).round()
    }

    pub fn format_time(&self, at: DateTime<Utc>) -> String {
        match self.utc_offset {
            Some(offset) => at.with_timezone(&offset).format(TIME_FORMAT).to_string(),
            None => at.with_timezone(&Local).format(TIME_FORMAT).to_string(),
        }
    }

    fn is_stale(&self, session: &TrackingSession, now: DateTime<Utc>) -> bool {
        match (self.stale_after, session.last_update()) {
            (Some(limit), Some(at)) => now - at > limit,
            _ => false,
        }
    }

    /// ETA for every stop of the session, in stop order.
    ///
    /// Reached stops are pinned to the time they were reached. Without a
    /// fresh position every other stop is pending.
    pub fn estimate(&self, session: &TrackingSession, now: DateTime<Utc>) -> Vec<StopEta> {
        let location = session
            .location()
            .filter(|_| !self.is_stale(session, now));

        session
            .stops()
            .iter()
            .map(|stop| {
                if let Some(reached_at) = session.reached_at(&stop.stop_id) {
                    return StopEta {
                        stop_id: stop.stop_id.clone(),
                        eta: Some(self.format_time(reached_at)),
                        eta_seconds: Some(0.0),
                        reached: true,
                    };
                }

                match location {
                    Some(bus) => {
                        let seconds =
                            self.seconds_between(bus.location, stop.location, bus.speed_kmh);
                        let arrival = now + Duration::seconds(seconds as i64);
                        StopEta {
                            stop_id: stop.stop_id.clone(),
                            eta: Some(self.format_time(arrival)),
                            eta_seconds: Some(seconds),
                            reached: false,
                        }
                    }
                    None => StopEta::pending(stop.stop_id.clone()),
                }
            })
            .collect()
    }
}
