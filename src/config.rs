//! App-level settings loaded from JSON.
//!
//! Every field is optional; anything missing keeps its default. A settings file only
//! needs to name what it changes:
//!
//! ```json
//! {
//!   "monitor": { "retry": { "max_attempts": 5 } },
//!   "controller": { "refresh_interval_ms": 33, "raster_options": { "boost": 1.0 } }
//! }
//! ```

use std::fs;
use std::io;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::controller::ControllerConfig;
use crate::monitor::MonitorConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings: {0}")]
    Io(#[from] io::Error),
    #[error("invalid settings: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatmapSettings {
    pub monitor: MonitorConfig,
    pub controller: ControllerConfig,
}

impl HeatmapSettings {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let settings = Self::from_json(&fs::read_to_string(path)?)?;
        info!("[Config] Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GpsPoint;

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(HeatmapSettings::from_json("{}").unwrap(), HeatmapSettings::default());
    }

    #[test]
    fn test_partial_override() {
        let json = r#"{
            "monitor": { "retry": { "max_attempts": 5 }, "max_pending": 16 },
            "controller": {
                "refresh_interval_ms": 33,
                "default_center": { "latitude": 40.71, "longitude": -74.0 },
                "raster_options": { "boost": 1.0 },
                "raster": { "radius_px": 24.0 }
            }
        }"#;
        let settings = HeatmapSettings::from_json(json).unwrap();

        assert_eq!(settings.monitor.retry.max_attempts, 5);
        assert_eq!(settings.monitor.retry.initial_backoff_ms, 25);
        assert_eq!(settings.monitor.max_pending, 16);
        assert_eq!(settings.monitor.event_capacity, 64);

        let controller = &settings.controller;
        assert_eq!(controller.refresh_interval_ms, 33);
        assert_eq!(controller.default_center, GpsPoint::new(40.71, -74.0));
        assert_eq!(controller.raster_options.boost, 1.0);
        assert!(controller.raster_options.grouping_enabled);
        assert_eq!(controller.raster.radius_px, 24.0);
        assert_eq!(controller.raster.group_cell_px, 8.0);
        assert_eq!(controller.sample_weight, 2.0);
    }

    #[test]
    fn test_round_trip_through_json() {
        let mut settings = HeatmapSettings::default();
        settings.controller.seed_span = 12.0;
        let json = settings.to_json().unwrap();
        assert_eq!(HeatmapSettings::from_json(&json).unwrap(), settings);
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            HeatmapSettings::from_json(r#"{"monitor": {"max_pending": "lots"}}"#),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            HeatmapSettings::from_file("/nonexistent/geo-heatmap/settings.json"),
            Err(ConfigError::Io(_))
        ));
    }
}
