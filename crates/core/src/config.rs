//! Tracker configuration.
//!
//! Loaded from a JSON document; every field has a default so an empty object
//! is a valid configuration.

use std::path::Path;
use std::time::Duration;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackingError};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Socket.io endpoint of the tracking backend
    pub server_url: String,
    /// Distance within which a stop counts as reached
    pub capture_radius_m: f64,
    pub speed_floor_kmh: f64,
    pub speed_ceiling_kmh: f64,
    /// Period of the ETA refresh timer
    pub refresh_interval_secs: u64,
    /// Positions older than this are treated as absent; 0 disables
    pub stale_after_secs: u64,
    /// Offset used to render ETAs; local time when unset
    pub utc_offset_minutes: Option<i32>,
    pub simulation: SimulationConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub tick_ms: u64,
    pub speed_kmh: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:3001".into(),
            capture_radius_m: 100.0,
            speed_floor_kmh: 10.0,
            speed_ceiling_kmh: 80.0,
            refresh_interval_secs: 20,
            stale_after_secs: 120,
            utc_offset_minutes: None,
            simulation: SimulationConfig::default(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            speed_kmh: 40.0,
        }
    }
}

impl TrackerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| TrackingError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| TrackingError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.capture_radius_m.is_finite() && self.capture_radius_m > 0.0) {
            return Err(TrackingError::Config(format!(
                "capture radius must be positive, got {}",
                self.capture_radius_m
            )));
        }
        if !(self.speed_floor_kmh.is_finite() && self.speed_floor_kmh > 0.0) {
            return Err(TrackingError::Config(format!(
                "speed floor must be positive, got {}",
                self.speed_floor_kmh
            )));
        }
        if !self.speed_ceiling_kmh.is_finite() || self.speed_ceiling_kmh < self.speed_floor_kmh {
            return Err(TrackingError::Config(format!(
                "speed ceiling {} is below floor {}",
                self.speed_ceiling_kmh, self.speed_floor_kmh
            )));
        }
        if self.refresh_interval_secs == 0 {
            return Err(TrackingError::Config("refresh interval must be non-zero".into()));
        }
        if self.simulation.tick_ms == 0 {
            return Err(TrackingError::Config("simulation tick must be non-zero".into()));
        }
        if !(self.simulation.speed_kmh.is_finite() && self.simulation.speed_kmh > 0.0) {
            return Err(TrackingError::Config(format!(
                "simulation speed must be positive, got {}",
                self.simulation.speed_kmh
            )));
        }
        self.utc_offset()?;
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn stale_after(&self) -> Option<chrono::Duration> {
        match self.stale_after_secs {
            0 => None,
            secs => Some(chrono::Duration::seconds(secs as i64)),
        }
    }

    pub fn utc_offset(&self) -> Result<Option<FixedOffset>> {
        self.utc_offset_minutes
            .map(|minutes| {
                FixedOffset::east_opt(minutes * 60).ok_or_else(|| {
                    TrackingError::Config(format!("utc offset of {minutes} minutes is out of range"))
                })
            })
            .transpose()
    }
}

impl SimulationConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TrackerConfig::default();
        assert_eq!(config.capture_radius_m, 100.0);
        assert_eq!(config.speed_floor_kmh, 10.0);
        assert_eq!(config.speed_ceiling_kmh, 80.0);
        assert_eq!(config.refresh_interval(), Duration::from_secs(20));
        assert_eq!(config.stale_after(), Some(chrono::Duration::seconds(120)));
        assert_eq!(config.simulation.tick_interval(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = TrackerConfig::from_json_str(
            r#"{ "capture_radius_m": 50, "utc_offset_minutes": 330, "simulation": { "speed_kmh": 25 } }"#,
        )
        .unwrap();

        assert_eq!(config.capture_radius_m, 50.0);
        assert_eq!(config.speed_ceiling_kmh, 80.0);
        assert_eq!(config.simulation.speed_kmh, 25.0);
        assert_eq!(config.simulation.tick_ms, 1000);
        assert_eq!(config.utc_offset().unwrap(), FixedOffset::east_opt(330 * 60));
    }

    #[test]
    fn test_stale_after_zero_disables() {
        let config = TrackerConfig {
            stale_after_secs: 0,
            ..TrackerConfig::default()
        };
        assert_eq!(config.stale_after(), None);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            TrackerConfig {
                capture_radius_m: 0.0,
                ..TrackerConfig::default()
            },
            TrackerConfig {
                speed_floor_kmh: -1.0,
                ..TrackerConfig::default()
            },
            TrackerConfig {
                speed_ceiling_kmh: 5.0,
                ..TrackerConfig::default()
            },
            TrackerConfig {
                refresh_interval_secs: 0,
                ..TrackerConfig::default()
            },
            TrackerConfig {
                utc_offset_minutes: Some(24 * 60),
                ..TrackerConfig::default()
            },
        ];

        for config in bad {
            assert!(matches!(config.validate(), Err(TrackingError::Config(_))), "{config:?}");
        }
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(TrackerConfig::from_json_str("not json").is_err());
        assert!(TrackerConfig::from_json_file("/definitely/missing/tracker.json").is_err());
    }
}
